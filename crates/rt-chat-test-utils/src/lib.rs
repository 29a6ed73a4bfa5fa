// rt-chat-test-utils: shared test utilities for the chat server's
// integration suite.
//
// Provides a minimal WebSocket client for driving one of the three channel
// endpoints (MSG, CMD, DATA) in black-box tests.

pub mod mock_ws_client;

pub use mock_ws_client::MockWsClient;
