//! Command Handler
//!
//! Turns one parsed client frame into the frames to send back.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │ into_args() │───>│  dispatch() │───>│  cmd_*()    │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! │                                         │          │        │
//! │                                         ▼          ▼        │
//! │                                  ConcurrentMap   PubSub     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Arity is checked before anything touches the map, so a malformed
//! command never has a partial effect.

use crate::protocol::Frame;
use crate::pubsub::{ClientId, Pattern};
use crate::server::Store;
use crate::storage::Key;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// What the connection should do after a command.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Send one frame.
    Single(Frame),
    /// Send several frames in order (one per SUBSCRIBE channel).
    Multi(Vec<Frame>),
    /// Send the frame, then close the connection.
    Close(Frame),
}

impl Response {
    /// The frames to write, in order.
    pub fn frames(&self) -> &[Frame] {
        match self {
            Response::Single(frame) | Response::Close(frame) => std::slice::from_ref(frame),
            Response::Multi(frames) => frames,
        }
    }

    pub fn closes(&self) -> bool {
        matches!(self, Response::Close(_))
    }
}

impl From<Frame> for Response {
    fn from(frame: Frame) -> Self {
        Response::Single(frame)
    }
}

/// Executes commands on behalf of one connection.
pub struct CommandHandler {
    store: Arc<Store>,
    client: ClientId,
    /// Where published messages for this connection are queued.
    outbox: mpsc::Sender<Frame>,
}

impl CommandHandler {
    pub fn new(store: Arc<Store>, client: ClientId, outbox: mpsc::Sender<Frame>) -> Self {
        Self {
            store,
            client,
            outbox,
        }
    }

    pub fn client(&self) -> ClientId {
        self.client
    }

    /// Executes a command frame.
    pub async fn execute(&self, command: Frame) -> Response {
        let args = match command.into_args() {
            Some(args) => args,
            None => return Frame::error("ERR invalid command format").into(),
        };

        let Some((name, args)) = args.split_first() else {
            return Frame::error("ERR empty command").into();
        };

        // Error replies quote the name as sent, minus line breaks that would
        // end the reply early.
        let name = String::from_utf8_lossy(name).replace(['\r', '\n'], " ");
        self.dispatch(&name, args).await
    }

    async fn dispatch(&self, name: &str, args: &[Bytes]) -> Response {
        let cmd = name.to_ascii_lowercase();
        if let Some(false) = arity_ok(&cmd, args.len()) {
            return wrong_arity(name).into();
        }

        match cmd.as_str() {
            "ping" => Frame::pong().into(),
            "quit" => Response::Close(Frame::ok()),
            "set" => self.cmd_set(args).into(),
            "get" => self.cmd_get(args).into(),
            "del" => self.cmd_del(args).into(),
            "mset" => self.cmd_mset(args).into(),
            "mget" => self.cmd_mget(args).into(),
            "save" => self.cmd_save().await.into(),
            "publish" => self.cmd_publish(args).into(),
            "subscribe" => self.cmd_subscribe(args),
            "psubscribe" => self.cmd_psubscribe(args),
            _ => Frame::error(format!("ERR unknown command '{}'", name)).into(),
        }
    }

    /// SET key value
    fn cmd_set(&self, args: &[Bytes]) -> Frame {
        let key = Key::from_wire(args[0].clone());
        match self.store.write(|map| map.set(key, args[1].clone())) {
            Some(_) => Frame::ok(),
            None => shutting_down(),
        }
    }

    /// GET key
    fn cmd_get(&self, args: &[Bytes]) -> Frame {
        match self.store.map().get(&Key::from_wire(args[0].clone())) {
            Some(value) => Frame::Bulk(value),
            None => Frame::null(),
        }
    }

    /// DEL key
    ///
    /// Replies OK whether or not the key existed.
    fn cmd_del(&self, args: &[Bytes]) -> Frame {
        let key = Key::from_wire(args[0].clone());
        match self.store.write(|map| map.del(&key)) {
            Some(_) => Frame::ok(),
            None => shutting_down(),
        }
    }

    /// MSET key value [key value ...]
    fn cmd_mset(&self, args: &[Bytes]) -> Frame {
        let (keys, values): (Vec<Key>, Vec<Bytes>) = args
            .chunks_exact(2)
            .map(|pair| (Key::from_wire(pair[0].clone()), pair[1].clone()))
            .unzip();

        match self.store.write(|map| map.mset(keys, values)) {
            Some(Ok(_)) => Frame::ok(),
            Some(Err(e)) => Frame::error(format!("ERR {}", e)),
            None => shutting_down(),
        }
    }

    /// MGET key [key ...]
    fn cmd_mget(&self, args: &[Bytes]) -> Frame {
        let map = self.store.map();
        Frame::array(
            args.iter()
                .map(|key| match map.get(&Key::from_wire(key.clone())) {
                    Some(value) => Frame::Bulk(value),
                    None => Frame::null(),
                })
                .collect(),
        )
    }

    /// SAVE
    async fn cmd_save(&self) -> Frame {
        match self.store.save().await {
            Ok(entries) => {
                info!(client = self.client, entries = entries, "Snapshot saved");
                Frame::ok()
            }
            Err(e) => {
                error!(client = self.client, error = %e, "SAVE failed");
                Frame::error(format!("ERR {}", e))
            }
        }
    }

    /// PUBLISH channel message
    fn cmd_publish(&self, args: &[Bytes]) -> Frame {
        let delivered = self.store.pubsub().publish(&args[0], &args[1]);
        debug!(client = self.client, receivers = delivered, "Published message");
        Frame::integer(delivered as i64)
    }

    /// SUBSCRIBE channel [channel ...]
    fn cmd_subscribe(&self, args: &[Bytes]) -> Response {
        let pubsub = self.store.pubsub();
        Response::Multi(
            args.iter()
                .map(|channel| {
                    let count = pubsub.subscribe(self.client, channel.clone(), &self.outbox);
                    confirmation("subscribe", channel, count)
                })
                .collect(),
        )
    }

    /// PSUBSCRIBE pattern [pattern ...]
    fn cmd_psubscribe(&self, args: &[Bytes]) -> Response {
        let pubsub = self.store.pubsub();
        Response::Multi(
            args.iter()
                .map(|pattern| {
                    let count =
                        pubsub.psubscribe(self.client, Pattern::new(pattern.clone()), &self.outbox);
                    confirmation("psubscribe", pattern, count)
                })
                .collect(),
        )
    }

    /// Releases everything this connection registered.
    pub fn disconnect(&self) {
        self.store.pubsub().remove_client(self.client);
    }
}

/// Checks the argument count (excluding the command name).
///
/// Returns `None` for commands it does not know.
fn arity_ok(cmd: &str, argc: usize) -> Option<bool> {
    let ok = match cmd {
        "ping" | "quit" | "save" => argc == 0,
        "get" | "del" => argc == 1,
        "set" | "publish" => argc == 2,
        "mset" => argc >= 2 && argc % 2 == 0,
        "mget" | "subscribe" | "psubscribe" => argc >= 1,
        _ => return None,
    };
    Some(ok)
}

fn wrong_arity(name: &str) -> Frame {
    Frame::error(format!(
        "ERR wrong number of arguments for '{}' command",
        name
    ))
}

fn shutting_down() -> Frame {
    Frame::error("ERR server is shutting down")
}

fn confirmation(kind: &'static str, target: &Bytes, count: usize) -> Frame {
    Frame::array(vec![
        Frame::bulk(kind),
        Frame::Bulk(target.clone()),
        Frame::integer(count as i64),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::StoreConfig;
    use tempfile::TempDir;

    struct Fixture {
        handler: CommandHandler,
        inbox: mpsc::Receiver<Frame>,
        store: Arc<Store>,
        _dir: TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(StoreConfig {
            dir: dir.path().to_path_buf(),
            ..StoreConfig::default()
        }));
        let (outbox, inbox) = mpsc::channel(16);
        let handler = CommandHandler::new(Arc::clone(&store), store.next_client_id(), outbox);
        Fixture {
            handler,
            inbox,
            store,
            _dir: dir,
        }
    }

    fn make_command(args: &[&str]) -> Frame {
        Frame::array(args.iter().map(|s| Frame::bulk(s.to_string())).collect())
    }

    async fn run(handler: &CommandHandler, args: &[&str]) -> Frame {
        match handler.execute(make_command(args)).await {
            Response::Single(frame) => frame,
            other => panic!("expected a single frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ping() {
        let f = fixture();
        assert_eq!(run(&f.handler, &["PING"]).await, Frame::pong());
        assert_eq!(run(&f.handler, &["ping"]).await, Frame::pong());
    }

    #[tokio::test]
    async fn test_quit_closes() {
        let f = fixture();
        let response = f.handler.execute(make_command(&["QUIT"])).await;
        assert_eq!(response, Response::Close(Frame::ok()));
        assert!(response.closes());
    }

    #[tokio::test]
    async fn test_set_get() {
        let f = fixture();
        assert_eq!(run(&f.handler, &["SET", "name", "Ariz"]).await, Frame::ok());
        assert_eq!(run(&f.handler, &["GET", "name"]).await, Frame::bulk("Ariz"));
        assert_eq!(run(&f.handler, &["get", "missing"]).await, Frame::null());
    }

    #[tokio::test]
    async fn test_del_is_idempotent() {
        let f = fixture();
        run(&f.handler, &["SET", "k", "v"]).await;
        assert_eq!(run(&f.handler, &["DEL", "k"]).await, Frame::ok());
        assert_eq!(run(&f.handler, &["DEL", "k"]).await, Frame::ok());
        assert_eq!(run(&f.handler, &["GET", "k"]).await, Frame::null());
    }

    #[tokio::test]
    async fn test_mset_mget() {
        let f = fixture();
        assert_eq!(
            run(&f.handler, &["MSET", "a", "1", "b", "2"]).await,
            Frame::ok()
        );
        assert_eq!(
            run(&f.handler, &["MGET", "a", "x", "b"]).await,
            Frame::array(vec![Frame::bulk("1"), Frame::null(), Frame::bulk("2")])
        );
    }

    #[tokio::test]
    async fn test_wrong_arity_leaves_map_untouched() {
        let f = fixture();
        assert_eq!(
            run(&f.handler, &["set", "k"]).await,
            Frame::error("ERR wrong number of arguments for 'set' command")
        );
        assert_eq!(
            run(&f.handler, &["MSET", "a", "1", "b"]).await,
            Frame::error("ERR wrong number of arguments for 'MSET' command")
        );
        assert_eq!(
            run(&f.handler, &["Get"]).await,
            Frame::error("ERR wrong number of arguments for 'Get' command")
        );
        assert!(run(&f.handler, &["PING", "hello"]).await.is_error());
        assert!(run(&f.handler, &["MGET"]).await.is_error());
        assert!(run(&f.handler, &["PUBLISH", "c"]).await.is_error());
        assert!(f.store.map().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let f = fixture();
        assert_eq!(
            run(&f.handler, &["FLUSHALL"]).await,
            Frame::error("ERR unknown command 'FLUSHALL'")
        );
    }

    #[tokio::test]
    async fn test_writes_rejected_after_close() {
        let f = fixture();
        assert_eq!(run(&f.handler, &["SET", "kept", "1"]).await, Frame::ok());

        f.store.close_writes();

        let refused = Frame::error("ERR server is shutting down");
        assert_eq!(run(&f.handler, &["SET", "late", "2"]).await, refused);
        assert_eq!(run(&f.handler, &["MSET", "a", "1", "b", "2"]).await, refused);
        assert_eq!(run(&f.handler, &["DEL", "kept"]).await, refused);

        // Reads keep working while the final snapshot is written.
        assert_eq!(run(&f.handler, &["GET", "kept"]).await, Frame::bulk("1"));
        assert_eq!(run(&f.handler, &["GET", "late"]).await, Frame::null());
        assert_eq!(f.store.map().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_command_name_cannot_split_reply() {
        let f = fixture();
        let reply = run(&f.handler, &["NOPE\r\n+OK"]).await;
        assert_eq!(reply, Frame::error("ERR unknown command 'NOPE  +OK'"));

        let encoded = reply.encode();
        assert_eq!(encoded.windows(2).filter(|w| *w == b"\r\n").count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_frames() {
        let f = fixture();
        assert_eq!(
            f.handler.execute(Frame::integer(1)).await,
            Response::Single(Frame::error("ERR invalid command format"))
        );
        assert_eq!(
            f.handler.execute(Frame::array(vec![])).await,
            Response::Single(Frame::error("ERR empty command"))
        );
    }

    #[tokio::test]
    async fn test_binary_and_text_keys_share_wire_form() {
        let f = fixture();
        run(&f.handler, &["SET", "k", "v"]).await;
        assert_eq!(f.store.map().get(&Key::from("k")), Some(Bytes::from("v")));

        let raw = Frame::array(vec![
            Frame::bulk("SET"),
            Frame::bulk(&b"\xff\xfe"[..]),
            Frame::bulk("bin"),
        ]);
        f.handler.execute(raw).await;
        assert_eq!(
            f.store.map().get(&Key::from(Bytes::from_static(b"\xff\xfe"))),
            Some(Bytes::from("bin"))
        );
    }

    #[tokio::test]
    async fn test_save_writes_snapshot() {
        let f = fixture();
        run(&f.handler, &["SET", "k", "v"]).await;
        assert_eq!(run(&f.handler, &["SAVE"]).await, Frame::ok());

        let snapshot = crate::storage::snapshot::read_file(f.store.snapshot_path()).unwrap();
        assert_eq!(snapshot.len(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_confirmations() {
        let f = fixture();
        let response = f.handler.execute(make_command(&["SUBSCRIBE", "a", "b"])).await;
        assert_eq!(
            response,
            Response::Multi(vec![
                Frame::array(vec![Frame::bulk("subscribe"), Frame::bulk("a"), Frame::integer(1)]),
                Frame::array(vec![Frame::bulk("subscribe"), Frame::bulk("b"), Frame::integer(2)]),
            ])
        );

        let response = f.handler.execute(make_command(&["PSUBSCRIBE", "n*"])).await;
        assert_eq!(
            response.frames(),
            &[Frame::array(vec![
                Frame::bulk("psubscribe"),
                Frame::bulk("n*"),
                Frame::integer(3)
            ])]
        );
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let mut subscriber = fixture();
        subscriber
            .handler
            .execute(make_command(&["SUBSCRIBE", "news"]))
            .await;

        let (outbox, _inbox) = mpsc::channel(16);
        let publisher = CommandHandler::new(
            Arc::clone(&subscriber.store),
            subscriber.store.next_client_id(),
            outbox,
        );

        assert_eq!(
            run(&publisher, &["PUBLISH", "news", "hello"]).await,
            Frame::integer(1)
        );
        assert_eq!(
            run(&publisher, &["PUBLISH", "other", "hello"]).await,
            Frame::integer(0)
        );
        assert_eq!(
            subscriber.inbox.try_recv().unwrap(),
            Frame::array(vec![
                Frame::bulk("message"),
                Frame::bulk("news"),
                Frame::bulk("hello")
            ])
        );
    }

    #[tokio::test]
    async fn test_disconnect_drops_subscriptions() {
        let f = fixture();
        f.handler.execute(make_command(&["SUBSCRIBE", "news"])).await;
        assert_eq!(f.store.pubsub().channel_count(), 1);

        f.handler.disconnect();
        assert_eq!(f.store.pubsub().channel_count(), 0);
        assert_eq!(f.store.pubsub().publish(&Bytes::from("news"), &Bytes::from("x")), 0);
    }
}
