//! End-to-end tests against the public embedding API.
//!
//! A fake transport (plain structs implementing [`Connection`]) drives the
//! callbacks the way a socket layer would, and a recording lobby plus
//! interpreter stand in for an application. Commands are processed on real
//! pool workers, so these tests exercise the dispatcher, the per-client
//! serialization, and the delivery queue together.

use std::{
    any::Any,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use parlor_proto::InboundEnvelope;
use parlor_server::{
    CommandInterpreter, Connection, ConnectionError, ConnectionId, InputError, Lobby,
    LobbyFactory, ServerConfig, ServerHandle, SessionServer, TaskDispatcher,
};
use serde_json::{Value, json};

// ---------------------------------------------------------------------------
// Test transport
// ---------------------------------------------------------------------------

#[derive(Default)]
struct TestConnection {
    sent: Mutex<Vec<Value>>,
    closed: AtomicBool,
}

impl TestConnection {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn frames(&self) -> Vec<Value> {
        self.sent.lock().unwrap().clone()
    }

    fn frames_of(&self, command: &str) -> Vec<Value> {
        self.frames().into_iter().filter(|frame| frame["command"] == command).collect()
    }

    fn was_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Connection for TestConnection {
    fn send_text(&self, text: &str) -> Result<(), ConnectionError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ConnectionError(e.to_string()))?;
        self.sent.lock().unwrap().push(value);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

// ---------------------------------------------------------------------------
// Test application
// ---------------------------------------------------------------------------

struct TestLobby {
    id: String,
    handle: ServerHandle,
    members: Mutex<Vec<String>>,
    log: Mutex<Vec<i64>>,
    events: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl TestLobby {
    fn members(&self) -> Vec<String> {
        self.members.lock().unwrap().clone()
    }

    fn log(&self) -> Vec<i64> {
        self.log.lock().unwrap().clone()
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl Lobby for TestLobby {
    fn init(&self, args: &Value) -> Result<(), InputError> {
        if args.get("fail").is_some() {
            return Err(InputError::new("arguments rejected"));
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn add_client(&self, client_id: &str) {
        self.members.lock().unwrap().push(client_id.to_owned());
    }

    fn remove_client(&self, client_id: &str) {
        self.members.lock().unwrap().retain(|member| member != client_id);
    }

    fn client_reconnected(&self, client_id: &str) {
        self.events.lock().unwrap().push(format!("reconnected:{client_id}"));
    }

    fn client_disconnected(&self, client_id: &str) {
        self.events.lock().unwrap().push(format!("disconnected:{client_id}"));
    }

    fn serialize(&self) -> Value {
        json!({ "lobby_id": self.id, "members": self.members().len() })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct TestInterpreter;

impl CommandInterpreter for TestInterpreter {
    fn interpret(
        &self,
        lobby: &Arc<dyn Lobby>,
        client_id: &str,
        envelope: &InboundEnvelope,
    ) -> Result<(), InputError> {
        let lobby = lobby
            .as_any()
            .downcast_ref::<TestLobby>()
            .ok_or_else(|| InputError::new("wrong lobby type"))?;

        if envelope.command.eq_ignore_ascii_case("append") {
            let value = envelope
                .field("value")
                .and_then(Value::as_i64)
                .ok_or_else(|| InputError::new("no value provided"))?;
            lobby.log.lock().unwrap().push(value);
            let notice = parlor_proto::OutboundEnvelope::ok(
                "appended",
                json!({ "value": value, "sender": client_id }),
            );
            for member in lobby.members() {
                if member != client_id {
                    lobby.handle.send_to_client(&member, &notice);
                }
            }
            Ok(())
        } else if envelope.command.eq_ignore_ascii_case("reject") {
            Err(InputError::new("interpreter rejected"))
        } else if envelope.command.eq_ignore_ascii_case("close_room") {
            lobby.closed.store(true, Ordering::SeqCst);
            Ok(())
        } else {
            Err(InputError::new(format!("unknown command '{}'", envelope.command)))
        }
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    server: SessionServer,
    rooms: Arc<Mutex<Vec<Arc<TestLobby>>>>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    fn with_config(config: ServerConfig) -> Self {
        let rooms: Arc<Mutex<Vec<Arc<TestLobby>>>> = Arc::new(Mutex::new(Vec::new()));

        let factory: LobbyFactory = {
            let rooms = Arc::clone(&rooms);
            Arc::new(move |handle, id| {
                let lobby = Arc::new(TestLobby {
                    id: id.to_owned(),
                    handle,
                    members: Mutex::new(Vec::new()),
                    log: Mutex::new(Vec::new()),
                    events: Mutex::new(Vec::new()),
                    closed: AtomicBool::new(false),
                });
                rooms.lock().unwrap().push(Arc::clone(&lobby));
                lobby as Arc<dyn Lobby>
            })
        };

        let dispatcher = Arc::new(TaskDispatcher::spawn(4).unwrap());
        let server =
            SessionServer::new(config, dispatcher, factory, Arc::new(TestInterpreter)).unwrap();

        Self { server, rooms }
    }

    /// Open a connection and wait for its identity to be acknowledged.
    fn connect(&self, client_id: &str) -> (Arc<TestConnection>, ConnectionId) {
        let conn = TestConnection::new();
        let id = self
            .server
            .connection_opened(Arc::clone(&conn) as Arc<dyn Connection>, Some(client_id.to_owned()));
        assert!(wait_until(|| !conn.frames_of("notify_id").is_empty()));
        (conn, id)
    }

    fn send(&self, conn: ConnectionId, value: &Value) {
        self.server.message_received(conn, value.to_string());
    }

    fn room(&self, index: usize) -> Arc<TestLobby> {
        Arc::clone(&self.rooms.lock().unwrap()[index])
    }

    fn room_count(&self) -> usize {
        self.rooms.lock().unwrap().len()
    }
}

fn start_lobby(id: &str) -> Value {
    json!({ "command": "start_lobby", "payload": { "lobby_id": id } })
}

fn join_lobby(id: &str) -> Value {
    json!({ "command": "join_lobby", "payload": { "lobby_id": id } })
}

fn leave_lobby() -> Value {
    json!({ "command": "leave_lobby", "payload": {} })
}

// ---------------------------------------------------------------------------
// Connection lifecycle
// ---------------------------------------------------------------------------

#[test]
fn connect_acknowledges_identity_and_lists_lobbies() {
    let harness = Harness::new();
    let (conn, _) = harness.connect("ada");

    let notify = &conn.frames_of("notify_id")[0];
    assert_eq!(notify["error_message"], "");
    assert_eq!(notify["payload"]["client_id"], "ada");

    assert!(wait_until(|| !conn.frames_of("get_lobbies").is_empty()));
    assert_eq!(conn.frames_of("get_lobbies")[0]["payload"], json!([]));
}

#[test]
fn connect_without_identity_mints_one() {
    let harness = Harness::new();
    let conn = TestConnection::new();
    harness.server.connection_opened(Arc::clone(&conn) as Arc<dyn Connection>, None);

    assert!(wait_until(|| !conn.frames_of("notify_id").is_empty()));
    let minted = conn.frames_of("notify_id")[0]["payload"]["client_id"].clone();
    assert_eq!(minted.as_str().map(str::len), Some(16));
}

#[test]
fn identity_theft_is_refused_and_connection_stays_unbound() {
    let harness = Harness::new();
    let (_ada, _) = harness.connect("ada");

    let thief = TestConnection::new();
    let thief_conn = harness
        .server
        .connection_opened(Arc::clone(&thief) as Arc<dyn Connection>, Some("ada".to_owned()));

    assert!(wait_until(|| !thief.frames_of("notify_id").is_empty()));
    assert_eq!(thief.frames_of("notify_id")[0]["error_message"], "don't steal identities");

    // The unbound connection cannot issue commands.
    harness.send(thief_conn, &start_lobby("L1"));
    assert!(wait_until(|| !thief.frames_of("command_error").is_empty()));
    assert_eq!(
        thief.frames_of("command_error")[0]["error_message"],
        "cannot continue without unique id"
    );
    assert_eq!(harness.room_count(), 0);
}

#[test]
fn reconnect_under_the_same_id_keeps_lobby_membership() {
    let harness = Harness::new();
    let (_conn, conn_id) = harness.connect("ada");

    harness.send(conn_id, &start_lobby("L1"));
    assert!(wait_until(|| harness.room_count() == 1));
    let room = harness.room(0);
    assert!(wait_until(|| room.members() == vec!["ada".to_owned()]));

    harness.server.connection_closed(conn_id);
    assert!(wait_until(|| room.events().contains(&"disconnected:ada".to_owned())));
    // Still a member while offline.
    assert_eq!(room.members(), vec!["ada".to_owned()]);

    let (_again, again_id) = harness.connect("ada");
    assert!(wait_until(|| room.events().contains(&"reconnected:ada".to_owned())));

    // Commands keep flowing into the same lobby.
    harness.send(again_id, &json!({ "command": "append", "payload": { "value": 7 } }));
    assert!(wait_until(|| room.log() == vec![7]));
}

#[test]
fn lobbyless_disconnect_forgets_the_client() {
    let harness = Harness::new();
    let (_conn, conn_id) = harness.connect("ada");

    harness.server.connection_closed(conn_id);
    assert!(wait_until(|| harness.server.connection_count() == 0));

    // A new connection under the same id is a fresh client, not a resume.
    let (conn, _) = harness.connect("ada");
    assert_eq!(conn.frames_of("notify_id")[0]["error_message"], "");
}

#[test]
fn connections_beyond_the_cap_are_refused() {
    let harness = Harness::with_config(ServerConfig { max_connections: 1 });
    let (_first, _) = harness.connect("ada");

    let second = TestConnection::new();
    harness.server.connection_opened(Arc::clone(&second) as Arc<dyn Connection>, None);

    assert!(wait_until(|| !second.frames_of("connection_error").is_empty()));
    assert_eq!(second.frames_of("connection_error")[0]["error_message"], "server is at capacity");
    assert!(second.was_closed());
    assert_eq!(harness.server.connection_count(), 1);
}

// ---------------------------------------------------------------------------
// The §8-style scenario: start, join, leave, join-missing
// ---------------------------------------------------------------------------

#[test]
fn start_join_leave_scenario() {
    let harness = Harness::new();
    let (conn_a, a) = harness.connect("A");
    let (conn_b, b) = harness.connect("B");
    let (conn_c, c) = harness.connect("C");

    // A starts L1.
    harness.send(a, &start_lobby("L1"));
    assert!(wait_until(|| !conn_a.frames_of("start_lobby_response").is_empty()));
    assert_eq!(conn_a.frames_of("start_lobby_response")[0]["error_message"], "");

    let room = harness.room(0);
    assert_eq!(room.members(), vec!["A".to_owned()]);

    // B joins L1; both are members.
    harness.send(b, &join_lobby("L1"));
    assert!(wait_until(|| !conn_b.frames_of("join_lobby_response").is_empty()));
    assert_eq!(conn_b.frames_of("join_lobby_response")[0]["error_message"], "");
    assert_eq!(room.members(), vec!["A".to_owned(), "B".to_owned()]);

    // B leaves; A remains.
    harness.send(b, &leave_lobby());
    assert!(wait_until(|| !conn_b.frames_of("leave_lobby_response").is_empty()));
    assert_eq!(conn_b.frames_of("leave_lobby_response")[0]["error_message"], "");
    assert_eq!(room.members(), vec!["A".to_owned()]);

    // C joins a lobby that does not exist; nothing changes.
    harness.send(c, &join_lobby("L2"));
    assert!(wait_until(|| !conn_c.frames_of("join_lobby_response").is_empty()));
    assert_eq!(
        conn_c.frames_of("join_lobby_response")[0]["error_message"],
        "no lobby with specified id exists"
    );
    assert_eq!(harness.room_count(), 1);
    assert_eq!(room.members(), vec!["A".to_owned()]);
}

// ---------------------------------------------------------------------------
// Lobby registry semantics through the wire
// ---------------------------------------------------------------------------

#[test]
fn duplicate_lobby_id_is_rejected_without_mutation() {
    let harness = Harness::new();
    let (_conn_a, a) = harness.connect("A");
    let (conn_b, b) = harness.connect("B");

    harness.send(a, &start_lobby("L1"));
    assert!(wait_until(|| harness.room_count() == 1));

    harness.send(b, &start_lobby("L1"));
    assert!(wait_until(|| !conn_b.frames_of("start_lobby_response").is_empty()));
    assert_eq!(conn_b.frames_of("start_lobby_response")[0]["error_message"], "lobby id in use");

    // Only the original room exists and B never became a member anywhere.
    assert_eq!(harness.room_count(), 1);
    assert_eq!(harness.room(0).members(), vec!["A".to_owned()]);
}

#[test]
fn closed_lobby_is_replaced_on_recreate() {
    let harness = Harness::new();
    let (conn_a, a) = harness.connect("A");
    let (conn_b, b) = harness.connect("B");

    harness.send(a, &start_lobby("L1"));
    assert!(wait_until(|| harness.room_count() == 1));

    harness.send(a, &json!({ "command": "close_room", "payload": {} }));
    assert!(wait_until(|| harness.room(0).is_closed()));

    harness.send(b, &start_lobby("L1"));
    assert!(wait_until(|| !conn_b.frames_of("start_lobby_response").is_empty()));
    assert_eq!(conn_b.frames_of("start_lobby_response")[0]["error_message"], "");
    assert_eq!(harness.room_count(), 2);

    // A's view of the world: its lobby reference still works (no force
    // close), but the registry now resolves L1 to the new room.
    assert!(!conn_a.was_closed());
    assert_eq!(harness.room(1).members(), vec!["B".to_owned()]);
}

#[test]
fn init_failure_creates_nothing() {
    let harness = Harness::new();
    let (conn_a, a) = harness.connect("A");

    harness.send(
        a,
        &json!({
            "command": "start_lobby",
            "payload": { "lobby_id": "L1", "arguments": { "fail": true } }
        }),
    );

    assert!(wait_until(|| !conn_a.frames_of("start_lobby_response").is_empty()));
    assert_eq!(
        conn_a.frames_of("start_lobby_response")[0]["error_message"],
        "arguments rejected"
    );

    // The factory ran but the registry never published the lobby, and the
    // client is still lobbyless.
    harness.send(a, &json!({ "command": "append", "payload": { "value": 1 } }));
    assert!(wait_until(|| !conn_a.frames_of("command_error").is_empty()));
    assert_eq!(
        conn_a.frames_of("command_error")[0]["error_message"],
        "must join a lobby first"
    );

    harness.send(a, &start_lobby("L1"));
    assert!(wait_until(|| conn_a.frames_of("start_lobby_response").len() == 2));
    assert_eq!(conn_a.frames_of("start_lobby_response")[1]["error_message"], "");
}

#[test]
fn get_lobbies_lists_open_lobbies() {
    let harness = Harness::new();
    let (conn_a, a) = harness.connect("A");

    harness.send(a, &start_lobby("L1"));
    assert!(wait_until(|| harness.room_count() == 1));

    harness.send(a, &json!({ "command": "GET_LOBBIES", "payload": {} }));
    assert!(wait_until(|| !conn_a.frames_of("get_lobbies_response").is_empty()));

    let listing = &conn_a.frames_of("get_lobbies_response")[0]["payload"];
    assert_eq!(listing, &json!([{ "lobby_id": "L1", "members": 1 }]));
}

// ---------------------------------------------------------------------------
// Protocol and error surfacing
// ---------------------------------------------------------------------------

#[test]
fn malformed_envelopes_get_an_error_and_mutate_nothing() {
    let harness = Harness::new();
    let (conn, conn_id) = harness.connect("ada");

    for bad in ["{}", "not json", r#"{"command": "x"}"#, r#"{"command": 3, "payload": {}}"#] {
        harness.server.message_received(conn_id, bad.to_owned());
    }

    assert!(wait_until(|| conn.frames_of("command_error").len() == 4));
    for frame in conn.frames_of("command_error") {
        assert_ne!(frame["error_message"], "");
    }
    assert_eq!(harness.room_count(), 0);
}

#[test]
fn missing_lobby_id_field_is_a_session_error() {
    let harness = Harness::new();
    let (conn, conn_id) = harness.connect("ada");

    harness.send(conn_id, &json!({ "command": "start_lobby", "payload": {} }));

    assert!(wait_until(|| !conn.frames_of("start_lobby_response").is_empty()));
    assert_eq!(
        conn.frames_of("start_lobby_response")[0]["error_message"],
        "no lobby_id provided"
    );
}

#[test]
fn interpreter_errors_reach_only_the_sender() {
    let harness = Harness::new();
    let (conn_a, a) = harness.connect("A");
    let (conn_b, b) = harness.connect("B");

    harness.send(a, &start_lobby("L1"));
    assert!(wait_until(|| harness.room_count() == 1));
    harness.send(b, &join_lobby("L1"));
    assert!(wait_until(|| harness.room(0).members().len() == 2));

    harness.send(b, &json!({ "command": "reject", "payload": {} }));
    assert!(wait_until(|| !conn_b.frames_of("command_error").is_empty()));
    assert_eq!(conn_b.frames_of("command_error")[0]["error_message"], "interpreter rejected");

    // A saw nothing of B's failure.
    harness.send(a, &json!({ "command": "append", "payload": { "value": 1 } }));
    assert!(wait_until(|| harness.room(0).log() == vec![1]));
    assert!(conn_a.frames_of("command_error").is_empty());
}

// ---------------------------------------------------------------------------
// Ordering guarantees
// ---------------------------------------------------------------------------

#[test]
fn one_clients_commands_apply_in_receipt_order() {
    let harness = Harness::new();
    let (_conn, conn_id) = harness.connect("ada");

    harness.send(conn_id, &start_lobby("L1"));
    assert!(wait_until(|| harness.room_count() == 1));
    let room = harness.room(0);

    // Fired as fast as the transport can push them; four pool workers race
    // to drain, yet the log must come out in receipt order.
    for value in 0..50 {
        harness.send(conn_id, &json!({ "command": "append", "payload": { "value": value } }));
    }

    assert!(wait_until(|| room.log().len() == 50));
    assert_eq!(room.log(), (0..50).collect::<Vec<i64>>());
}

#[test]
fn broadcasts_to_one_connection_arrive_in_order() {
    let harness = Harness::new();
    let (conn_a, a) = harness.connect("A");
    let (_conn_b, b) = harness.connect("B");

    harness.send(a, &start_lobby("L1"));
    assert!(wait_until(|| harness.room_count() == 1));
    harness.send(b, &join_lobby("L1"));
    assert!(wait_until(|| harness.room(0).members().len() == 2));

    for value in 0..40 {
        harness.send(b, &json!({ "command": "append", "payload": { "value": value } }));
    }

    assert!(wait_until(|| conn_a.frames_of("appended").len() == 40));
    let received: Vec<i64> = conn_a
        .frames_of("appended")
        .iter()
        .filter_map(|frame| frame["payload"]["value"].as_i64())
        .collect();
    assert_eq!(received, (0..40).collect::<Vec<i64>>());
}

// ---------------------------------------------------------------------------
// Embedder handle
// ---------------------------------------------------------------------------

#[test]
fn handle_close_lobby_frees_the_id() {
    let harness = Harness::new();
    let (_conn_a, a) = harness.connect("A");
    let (conn_b, b) = harness.connect("B");

    harness.send(a, &start_lobby("L1"));
    assert!(wait_until(|| harness.room_count() == 1));
    assert!(harness.server.handle().lobby("L1").is_some());

    harness.server.handle().close_lobby("L1");
    assert!(harness.server.handle().lobby("L1").is_none());

    harness.send(b, &join_lobby("L1"));
    assert!(wait_until(|| !conn_b.frames_of("join_lobby_response").is_empty()));
    assert_eq!(
        conn_b.frames_of("join_lobby_response")[0]["error_message"],
        "no lobby with specified id exists"
    );
}

#[test]
fn handle_broadcast_lobbies_reaches_lobbyless_clients_only() {
    let harness = Harness::new();
    let (conn_a, a) = harness.connect("A");
    let (conn_b, _b) = harness.connect("B");

    harness.send(a, &start_lobby("L1"));
    assert!(wait_until(|| harness.room_count() == 1));

    let a_before = conn_a.frames_of("get_lobbies").len();
    let b_before = conn_b.frames_of("get_lobbies").len();

    harness.server.handle().broadcast_lobbies();

    assert!(wait_until(|| conn_b.frames_of("get_lobbies").len() == b_before + 1));
    let listing = conn_b.frames_of("get_lobbies").last().cloned().unwrap();
    assert_eq!(listing["payload"], json!([{ "lobby_id": "L1", "members": 1 }]));

    // A is in a lobby and gets no push.
    assert_eq!(conn_a.frames_of("get_lobbies").len(), a_before);
}

#[test]
fn handle_drop_client_discards_a_disconnected_participant() {
    let harness = Harness::new();
    let (_conn, conn_id) = harness.connect("ada");

    harness.send(conn_id, &start_lobby("L1"));
    assert!(wait_until(|| harness.room_count() == 1));
    let room = harness.room(0);

    harness.server.connection_closed(conn_id);
    assert!(wait_until(|| room.events().contains(&"disconnected:ada".to_owned())));

    harness.server.handle().drop_client("ada");

    // Rebinding the id is a fresh client now: no reconnect notification.
    let (_again, _) = harness.connect("ada");
    std::thread::sleep(Duration::from_millis(100));
    assert!(!room.events().contains(&"reconnected:ada".to_owned()));
}
