//! Venue codecs and stream constructors

pub mod bybit;
pub mod deribit;
pub mod parsing;

pub use parsing::Level;

/// Exchange identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Exchange {
    Bybit,
    Deribit,
}

impl Exchange {
    pub fn name(&self) -> &'static str {
        match self {
            Exchange::Bybit => "bybit",
            Exchange::Deribit => "deribit",
        }
    }

    /// Default public endpoint
    pub fn default_url(&self) -> &'static str {
        match self {
            Exchange::Bybit => bybit::LINEAR_URL,
            Exchange::Deribit => deribit::PUBLIC_URL,
        }
    }
}

impl std::fmt::Display for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
