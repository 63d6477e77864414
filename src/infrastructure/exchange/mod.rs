pub mod bybit;
pub mod mock;

pub use bybit::BybitExchangeAdapter;
pub use mock::MockExchangeAdapter;
