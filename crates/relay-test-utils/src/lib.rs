// relay-test-utils: Shared test utilities for the receive pipeline.
//
// Provides a mock relay server and client speaking the same
// length-delimited `WebSocketMessage` framing as the real relay, for
// integration testing receiver components without a live server.

pub mod mock_ws_client;
pub mod mock_ws_server;

pub use mock_ws_client::MockRelayClient;
pub use mock_ws_server::{MockRelayConnection, MockRelayError, MockRelayServer};
