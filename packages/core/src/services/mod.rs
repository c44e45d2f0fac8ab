pub mod horizon;

#[cfg(test)]
pub mod mock_horizon;
