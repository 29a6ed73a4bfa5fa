//! Black-box tests driving the three WebSocket channels end to end against
//! a real MySQL instance, the same "spin up a container, hit the real
//! server, assert on the wire" shape used elsewhere in this workspace's
//! test suites.

use std::net::SocketAddr;

use chat_server::state::AppState;
use chat_server::{channel_server, db, repo};
use rt_chat_protocol::{ChannelKind, ChatMessage, CommandAction, Envelope, Payload, SyncItemKind};
use rt_chat_test_utils::MockWsClient;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::mysql::Mysql;

#[allow(dead_code)]
struct Channels {
    cmd: SocketAddr,
    msg: SocketAddr,
    data: SocketAddr,
}

async fn bind_and_serve(name: &'static str, state: AppState) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(channel_server::serve(listener, name, state));
    addr
}

async fn spawn_server(state: AppState) -> Channels {
    let cmd = bind_and_serve("cmd", state.clone()).await;
    let msg = bind_and_serve("msg", state.clone()).await;
    let data = bind_and_serve("data", state).await;
    Channels { cmd, msg, data }
}

fn ws_url(addr: SocketAddr) -> String {
    format!("ws://{addr}/ws")
}

async fn new_pool(storage: &str) -> (ContainerAsync<Mysql>, AppState) {
    let container = Mysql::default().start().await.unwrap();
    let port = container.get_host_port_ipv4(3306).await.unwrap();
    let db_url = format!("mysql://root@127.0.0.1:{port}/test");
    let pool = db::create_pool(&db_url).await;
    db::run_migrations(&pool).await;
    let state = AppState::new(pool, std::env::temp_dir().join(format!("chat-server-test-{storage}")));
    (container, state)
}

async fn bind_connection(client: &mut MockWsClient, user_id: &str, channel: ChannelKind) {
    client.send(&Envelope::command(CommandAction::RememberConnection { user_id: user_id.to_owned(), channel })).await.unwrap();
    assert_eq!(client.recv().await.unwrap(), Envelope::command(CommandAction::Success));
}

// ---------------------------------------------------------------------------
// Scenario A: GET_VERI_CODE -> AUTHENTICATION -> REGISTER -> SIGN_IN
// ---------------------------------------------------------------------------

#[tokio::test]
async fn registration_requires_a_code_confirmed_by_authentication() {
    let (_container, state) = new_pool("registration").await;
    let cache = state.cache.clone();
    let channels = spawn_server(state).await;

    let mut cmd = MockWsClient::connect(&ws_url(channels.cmd)).await.unwrap();

    cmd.send(&Envelope::command(CommandAction::GetVeriCode { email: "alice@example.com".to_owned() })).await.unwrap();
    assert_eq!(cmd.recv().await.unwrap(), Envelope::command(CommandAction::AcceptPostCode));

    let code = cache.peek_veri_code("alice@example.com").await.expect("code must be cached after GET_VERI_CODE");

    cmd.send(&Envelope::command(CommandAction::Authentication { email: "alice@example.com".to_owned(), code })).await.unwrap();
    assert_eq!(cmd.recv().await.unwrap(), Envelope::command(CommandAction::SuccessAuth));

    cmd.send(&Envelope::command(CommandAction::Register {
        email: "alice@example.com".to_owned(),
        user_id: "alice".to_owned(),
        pw_hash: "digest-of-alices-password".to_owned(),
    }))
    .await
    .unwrap();
    assert_eq!(cmd.recv().await.unwrap(), Envelope::command(CommandAction::AcceptRegi));

    cmd.send(&Envelope::command(CommandAction::SignIn {
        principal: "alice".to_owned(),
        pw_hash: "digest-of-alices-password".to_owned(),
    }))
    .await
    .unwrap();
    assert_eq!(
        cmd.recv().await.unwrap(),
        Envelope::command(CommandAction::AcceptLogin { other_identifier: "alice".to_owned() })
    );
}

#[tokio::test]
async fn register_without_a_confirmed_code_is_refused() {
    let (_container, state) = new_pool("registration-unconfirmed").await;
    let channels = spawn_server(state).await;

    let mut cmd = MockWsClient::connect(&ws_url(channels.cmd)).await.unwrap();
    cmd.send(&Envelope::command(CommandAction::Register {
        email: "ghost@example.com".to_owned(),
        user_id: "ghost".to_owned(),
        pw_hash: "whatever".to_owned(),
    }))
    .await
    .unwrap();

    let reply = cmd.recv().await.unwrap();
    assert!(matches!(reply.payload, Payload::CommandRequest(r) if matches!(r.action, CommandAction::Refused { .. })));
}

// ---------------------------------------------------------------------------
// Scenario B: a message sent while the recipient is offline is replayed on
// the recipient's next ONLINE_INIT.
// ---------------------------------------------------------------------------

#[tokio::test]
async fn messages_sent_while_offline_are_replayed_on_reconnect() {
    let (_container, state) = new_pool("offline-replay").await;
    repo::users::create_user(&state.pool, "alice", "alice@example.com", "hash-a").await.unwrap();
    repo::users::create_user(&state.pool, "bob", "bob@example.com", "hash-b").await.unwrap();
    let channels = spawn_server(state).await;

    let mut alice_msg = MockWsClient::connect(&ws_url(channels.msg)).await.unwrap();
    bind_connection(&mut alice_msg, "alice", ChannelKind::Msg).await;

    let chat = ChatMessage {
        sender: "alice".to_owned(),
        receiver: "bob".to_owned(),
        is_group: false,
        timestamp: 1_000,
        text: "hi bob".to_owned(),
        pin: false,
        payload: None,
    };
    alice_msg.send(&Envelope { user_id: None, payload: Payload::ChatMessage(chat) }).await.unwrap();

    // bob was never connected when the message arrived; it must wait in the
    // durable backlog rather than being dropped.
    let mut bob_msg = MockWsClient::connect(&ws_url(channels.msg)).await.unwrap();
    bind_connection(&mut bob_msg, "bob", ChannelKind::Msg).await;

    let mut bob_data = MockWsClient::connect(&ws_url(channels.data)).await.unwrap();
    bind_connection(&mut bob_data, "bob", ChannelKind::Data).await;

    let mut bob_cmd = MockWsClient::connect(&ws_url(channels.cmd)).await.unwrap();
    bind_connection(&mut bob_cmd, "bob", ChannelKind::Cmd).await;

    bob_cmd.send(&Envelope::command(CommandAction::OnlineInit { user_id: "bob".to_owned() })).await.unwrap();

    // the relation net, presence snapshot, and offline-message backlog all
    // arrive on the DATA connection; only the Success reply comes back on
    // the CMD connection ONLINE_INIT was issued on.
    let relation_net = bob_data.recv().await.unwrap();
    assert!(matches!(relation_net.payload, Payload::SyncItem(ref s) if s.kind == SyncItemKind::RelationNetFull));
    let friend_status = bob_data.recv().await.unwrap();
    assert!(matches!(friend_status.payload, Payload::SyncItem(ref s) if s.kind == SyncItemKind::AllFriendStatus));
    assert_eq!(bob_cmd.recv().await.unwrap(), Envelope::command(CommandAction::Success));

    let offline = bob_data.recv().await.unwrap();
    match offline.payload {
        Payload::OfflineMessages(batch) => {
            assert_eq!(batch.messages.len(), 1);
            assert_eq!(batch.messages[0].text, "hi bob");
            assert_eq!(batch.messages[0].sender, "alice");
        }
        other => panic!("expected OfflineMessages, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// The wire timestamp is advisory only: the server stamps its own receive
// time, so a forged client clock can't skew delivery ordering.
// ---------------------------------------------------------------------------

#[tokio::test]
async fn the_servers_receive_time_replaces_a_forged_client_timestamp() {
    let (_container, state) = new_pool("server-stamped-timestamp").await;
    repo::users::create_user(&state.pool, "alice", "alice@example.com", "hash-a").await.unwrap();
    repo::users::create_user(&state.pool, "bob", "bob@example.com", "hash-b").await.unwrap();
    let pool = state.pool.clone();
    let channels = spawn_server(state).await;

    let mut alice_msg = MockWsClient::connect(&ws_url(channels.msg)).await.unwrap();
    bind_connection(&mut alice_msg, "alice", ChannelKind::Msg).await;

    let before = chrono::Utc::now().timestamp_millis();
    let chat = ChatMessage {
        sender: "alice".to_owned(),
        receiver: "bob".to_owned(),
        is_group: false,
        timestamp: 1, // an obviously forged, ancient client clock
        text: "clock check".to_owned(),
        pin: false,
        payload: None,
    };
    alice_msg.send(&Envelope { user_id: None, payload: Payload::ChatMessage(chat) }).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    let after = chrono::Utc::now().timestamp_millis();

    let pending = repo::messages::fetch_pending(&pool, "bob").await.unwrap();
    assert_eq!(pending.len(), 1);
    assert!(
        pending[0].timestamp >= before && pending[0].timestamp <= after,
        "expected a server receive time in [{before}, {after}], got {}",
        pending[0].timestamp
    );
}

#[tokio::test]
async fn a_blocked_senders_message_is_persisted_but_never_forwarded() {
    let (_container, state) = new_pool("blocked-message").await;
    repo::users::create_user(&state.pool, "alice", "alice@example.com", "hash-a").await.unwrap();
    repo::users::create_user(&state.pool, "bob", "bob@example.com", "hash-b").await.unwrap();
    repo::friends::create_request(&state.pool, "alice", "bob").await.unwrap();
    repo::friends::accept_request(&state.pool, "alice", "bob").await.unwrap();
    repo::friends::set_blocked(&state.pool, "bob", "alice", true).await.unwrap();
    let pool = state.pool.clone();
    let channels = spawn_server(state).await;

    let mut alice_msg = MockWsClient::connect(&ws_url(channels.msg)).await.unwrap();
    bind_connection(&mut alice_msg, "alice", ChannelKind::Msg).await;

    let mut bob_msg = MockWsClient::connect(&ws_url(channels.msg)).await.unwrap();
    bind_connection(&mut bob_msg, "bob", ChannelKind::Msg).await;

    let chat = ChatMessage {
        sender: "alice".to_owned(),
        receiver: "bob".to_owned(),
        is_group: false,
        timestamp: 2_000,
        text: "are you there?".to_owned(),
        pin: false,
        payload: None,
    };
    alice_msg.send(&Envelope { user_id: None, payload: Payload::ChatMessage(chat) }).await.unwrap();

    // give the server a moment to process before asserting on the absence
    // of a side effect
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let pending = repo::messages::fetch_pending(&pool, "bob").await.unwrap();
    assert_eq!(pending.len(), 1, "the message is persisted even though bob has alice blocked");
}

// ---------------------------------------------------------------------------
// Scenario C: a duplicate upload is denied and points at the existing file.
// ---------------------------------------------------------------------------

#[tokio::test]
async fn uploading_a_known_hash_is_denied_as_a_duplicate() {
    let (_container, state) = new_pool("dedup-upload").await;
    repo::users::create_user(&state.pool, "carol", "carol@example.com", "hash-c").await.unwrap();
    repo::files::register(&state.pool, "File_existing", "deadbeef", "report.pdf", 4096, "carol").await.unwrap();
    let channels = spawn_server(state).await;

    let mut cmd = MockWsClient::connect(&ws_url(channels.cmd)).await.unwrap();
    bind_connection(&mut cmd, "carol", ChannelKind::Cmd).await;

    cmd.send(&Envelope::command(CommandAction::UploadFile {
        file_name: "report-copy.pdf".to_owned(),
        file_hash: "deadbeef".to_owned(),
        file_size: 4096,
    }))
    .await
    .unwrap();

    assert_eq!(
        cmd.recv().await.unwrap(),
        Envelope::command(CommandAction::DenyFile {
            file_hash: "deadbeef".to_owned(),
            reason: "1".to_owned(),
            file_id: "File_existing".to_owned(),
        })
    );
}

// ---------------------------------------------------------------------------
// Scenario D: two admins racing to resolve the same join request.
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_resolution_of_a_join_request_is_decided_exactly_once() {
    let (_container, state) = new_pool("join-request-race").await;
    repo::users::create_user(&state.pool, "owner", "owner@example.com", "hash-o").await.unwrap();
    repo::users::create_user(&state.pool, "admin2", "admin2@example.com", "hash-a2").await.unwrap();
    repo::users::create_user(&state.pool, "dave", "dave@example.com", "hash-d").await.unwrap();
    repo::groups::create_group(&state.pool, "Group_race", "Racers", "owner").await.unwrap();
    repo::groups::add_member(&state.pool, "Group_race", "admin2").await.unwrap();
    repo::groups::set_admin(&state.pool, "Group_race", "admin2", true).await.unwrap();
    let command_id = repo::join_requests::create_join_request(&state.pool, "Group_race", "dave", None).await.unwrap();

    let channels = spawn_server(state).await;

    let mut owner_cmd = MockWsClient::connect(&ws_url(channels.cmd)).await.unwrap();
    bind_connection(&mut owner_cmd, "owner", ChannelKind::Cmd).await;
    let mut admin2_cmd = MockWsClient::connect(&ws_url(channels.cmd)).await.unwrap();
    bind_connection(&mut admin2_cmd, "admin2", ChannelKind::Cmd).await;

    owner_cmd.send(&Envelope::command(CommandAction::AcceptGreq { time: 1, command_id })).await.unwrap();
    admin2_cmd.send(&Envelope::command(CommandAction::RefuseGreq { time: 1, command_id })).await.unwrap();

    let owner_reply = owner_cmd.recv().await.unwrap();
    let admin2_reply = admin2_cmd.recv().await.unwrap();

    let outcomes = [action_of(&owner_reply), action_of(&admin2_reply)];
    let success_count = outcomes.iter().filter(|a| matches!(a, CommandAction::Success)).count();
    let managed_count = outcomes.iter().filter(|a| matches!(a, CommandAction::Managed)).count();
    assert_eq!(success_count, 1, "exactly one resolver should win the race");
    assert_eq!(managed_count, 1, "the loser should be told the request was already managed");
}

// ---------------------------------------------------------------------------
// Scenario D': the same race, on a friend request instead of a group one --
// two of the target's own connections (e.g. two devices) both resolving the
// same pending ACCEPT_FREQ/REFUSE_FREQ.
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_resolution_of_a_friend_request_is_decided_exactly_once() {
    let (_container, state) = new_pool("friend-request-race").await;
    repo::users::create_user(&state.pool, "alice", "alice@example.com", "hash-a").await.unwrap();
    repo::users::create_user(&state.pool, "bob", "bob@example.com", "hash-b").await.unwrap();
    repo::friends::create_request(&state.pool, "alice", "bob").await.unwrap();

    let channels = spawn_server(state).await;

    let mut bob_device1 = MockWsClient::connect(&ws_url(channels.cmd)).await.unwrap();
    bind_connection(&mut bob_device1, "bob", ChannelKind::Cmd).await;
    let mut bob_device2 = MockWsClient::connect(&ws_url(channels.cmd)).await.unwrap();
    bind_connection(&mut bob_device2, "bob", ChannelKind::Cmd).await;

    bob_device1.send(&Envelope::command(CommandAction::AcceptFreq { time: 1, requester: "alice".to_owned() })).await.unwrap();
    bob_device2.send(&Envelope::command(CommandAction::RefuseFreq { time: 1, requester: "alice".to_owned() })).await.unwrap();

    let reply1 = bob_device1.recv().await.unwrap();
    let reply2 = bob_device2.recv().await.unwrap();

    let outcomes = [action_of(&reply1), action_of(&reply2)];
    let success_count = outcomes.iter().filter(|a| matches!(a, CommandAction::Success)).count();
    let managed_count = outcomes.iter().filter(|a| matches!(a, CommandAction::Managed)).count();
    assert_eq!(success_count, 1, "exactly one resolver should win the race");
    assert_eq!(managed_count, 1, "the loser should be told the request was already managed");
}

fn action_of(env: &Envelope) -> CommandAction {
    match &env.payload {
        Payload::CommandRequest(req) => req.action.clone(),
        other => panic!("expected a command reply, got {other:?}"),
    }
}
