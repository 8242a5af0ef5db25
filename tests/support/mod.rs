pub mod mock_coordinator;
