pub mod capture;
pub mod config;
pub mod error;
pub mod log;
pub mod replay;
pub mod transport;

#[cfg(test)]
mod test;
