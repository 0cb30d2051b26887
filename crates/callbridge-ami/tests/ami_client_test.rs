//! AmiClient against an in-process fake manager
//!
//! The fake keeps an in-memory key/value database and answers the `database`
//! CLI commands the way Asterisk does.

use callbridge_ami::AmiClient;
use callbridge_core::config::AmiConfig;
use callbridge_core::traits::PbxCommands;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::time::sleep;

/// How the fake answers the next `Command` action
#[derive(Clone, Copy)]
enum Stall {
    /// Hold the whole reply back
    Delay(Duration),
    /// Send the reply without its closing blank line, then finish it late
    Truncate(Duration),
}

#[derive(Default)]
struct FakePbx {
    db: Mutex<BTreeMap<String, String>>,
    logins: AtomicUsize,
    stall_next: Mutex<Option<Stall>>,
}

impl FakePbx {
    fn with_rows(rows: &[(&str, &str)]) -> Self {
        let pbx = Self::default();
        pbx.db
            .lock()
            .unwrap()
            .extend(rows.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        pbx
    }

    fn stall_next(&self, stall: Stall) {
        *self.stall_next.lock().unwrap() = Some(stall);
    }

    fn run_cli(&self, command: &str) -> String {
        let parts: Vec<&str> = command.split_whitespace().collect();
        let mut db = self.db.lock().unwrap();
        let body = match parts.as_slice() {
            ["database", "get", family, key] => match db.get(&format!("/{}/{}", family, key)) {
                Some(v) => format!("Output: Value: {}\r\n", v),
                None => "Output: Database entry not found.\r\n".to_string(),
            },
            ["database", "put", family, key, value] => {
                db.insert(format!("/{}/{}", family, key), value.to_string());
                "Output: Updated database successfully\r\n".to_string()
            }
            ["database", "del", family, key] => match db.remove(&format!("/{}/{}", family, key)) {
                Some(_) => "Output: Database entry removed.\r\n".to_string(),
                None => "Output: Database entry does not exist.\r\n".to_string(),
            },
            ["database", "deltree", family] => {
                let prefix = format!("/{}/", family);
                let before = db.len();
                db.retain(|k, _| !k.starts_with(&prefix));
                format!("Output: {} database entries removed.\r\n", before - db.len())
            }
            ["database", "show", family] => {
                let prefix = format!("/{}/", family);
                let mut out = String::new();
                let mut n = 0;
                for (k, v) in db.iter().filter(|(k, _)| k.starts_with(&prefix)) {
                    out.push_str(&format!("Output: {:<40}: {}\r\n", k, v));
                    n += 1;
                }
                out.push_str(&format!("Output: {} results found.\r\n", n));
                out
            }
            _ => return "Response: Error\r\nMessage: Command output follows\r\nOutput: No such command\r\n\r\n".to_string(),
        };
        format!(
            "Response: Success\r\nMessage: Command output follows\r\n{}\r\n",
            body
        )
    }
}

async fn start_fake(pbx: Arc<FakePbx>) -> AmiConfig {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            let pbx = pbx.clone();
            tokio::spawn(async move {
                let (read, mut write) = socket.into_split();
                let mut reader = BufReader::new(read);
                write.write_all(b"Asterisk Call Manager/7.0.3\r\n").await.unwrap();

                loop {
                    let mut headers = Vec::new();
                    loop {
                        let mut line = String::new();
                        if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                            return;
                        }
                        let line = line.trim_end().to_string();
                        if line.is_empty() {
                            break;
                        }
                        headers.push(line);
                    }
                    let get = |name: &str| {
                        headers
                            .iter()
                            .find_map(|h| h.strip_prefix(&format!("{}: ", name)).map(String::from))
                            .unwrap_or_default()
                    };
                    let reply = match get("Action").as_str() {
                        "Login" => {
                            pbx.logins.fetch_add(1, Ordering::SeqCst);
                            if get("Secret") == "secret" {
                                "Response: Success\r\nMessage: Authentication accepted\r\n\r\n".to_string()
                            } else {
                                "Response: Error\r\nMessage: Authentication failed\r\n\r\n".to_string()
                            }
                        }
                        "Ping" => "Response: Success\r\nPing: Pong\r\n\r\n".to_string(),
                        "Logoff" => {
                            let _ = write
                                .write_all(b"Response: Goodbye\r\nMessage: Thanks for all the fish.\r\n\r\n")
                                .await;
                            return;
                        }
                        "Command" => {
                            let reply = pbx.run_cli(&get("Command"));
                            let stall = pbx.stall_next.lock().unwrap().take();
                            match stall {
                                Some(Stall::Delay(wait)) => {
                                    sleep(wait).await;
                                    reply
                                }
                                Some(Stall::Truncate(wait)) => {
                                    let head = reply.strip_suffix("\r\n").unwrap_or(&reply);
                                    if write.write_all(head.as_bytes()).await.is_err() {
                                        return;
                                    }
                                    sleep(wait).await;
                                    "\r\n".to_string()
                                }
                                None => reply,
                            }
                        }
                        _ => "Response: Error\r\nMessage: Invalid/unknown command\r\n\r\n".to_string(),
                    };
                    if write.write_all(reply.as_bytes()).await.is_err() {
                        return;
                    }
                }
            });
        }
    });

    AmiConfig::new("127.0.0.1", port, "admin", "secret")
}

#[tokio::test]
async fn test_database_round_trip() {
    let pbx = Arc::new(FakePbx::default());
    let client = AmiClient::new(start_fake(pbx.clone()).await);

    assert_eq!(client.get_value("ABS/ERV", "PJSIP/phone1").await, "");
    assert!(client.put_value("ABS/ERV", "PJSIP/phone1", "201").await);
    assert_eq!(client.get_value("ABS/ERV", "PJSIP/phone1").await, "201");
    assert!(client.delete_value("ABS/ERV", "PJSIP/phone1").await);
    assert!(!client.delete_value("ABS/ERV", "PJSIP/phone1").await);
    assert!(client.is_connected().await);

    // one lazy login for all of the above
    assert_eq!(pbx.logins.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_show_and_deltree() {
    let pbx = Arc::new(FakePbx::default());
    let client = AmiClient::new(start_fake(pbx).await);

    assert!(client.put_value("ABS/GRP", "1", "201&202").await);
    assert!(client.put_value("ABS/GRP/1", "EXT", "600").await);
    assert!(client.put_value("ABS/GRP/1", "TMO", "20").await);

    let entries = client.show_namespace("ABS/GRP").await;
    let keys: Vec<&str> = entries.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["1", "1/EXT", "1/TMO"]);
    assert_eq!(entries[0].value, "201&202");

    assert!(client.delete_namespace("ABS/GRP/1").await);
    assert_eq!(client.show_namespace("ABS/GRP").await.len(), 1);
}

#[tokio::test]
async fn test_exec_command_error() {
    let pbx = Arc::new(FakePbx::default());
    let client = AmiClient::new(start_fake(pbx).await);

    let err = tokio_test::assert_err!(client.exec_command("bogus command").await);
    assert_eq!(err.error_code(), "pbx_error");
    assert_eq!(client.exec_raw("bogus command").await, "");
}

#[tokio::test]
async fn test_wrong_secret_yields_sentinels() {
    let pbx = Arc::new(FakePbx::default());
    let mut config = start_fake(pbx).await;
    config.secret = "nope".to_string();
    let client = AmiClient::new(config);

    assert_eq!(client.get_value("ABS/ERV", "PJSIP/phone1").await, "");
    assert!(!client.is_connected().await);
}

#[tokio::test]
async fn test_ping_and_disconnect() {
    let pbx = Arc::new(FakePbx::default());
    let client = AmiClient::new(start_fake(pbx.clone()).await);

    client.ping().await.unwrap();
    client.disconnect().await;
    assert!(!client.is_connected().await);

    // reconnects lazily
    client.ping().await.unwrap();
    assert_eq!(pbx.logins.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_late_reply_does_not_answer_next_action() {
    let pbx = Arc::new(FakePbx::with_rows(&[
        ("/T/alpha", "value-of-alpha"),
        ("/T/beta", "value-of-beta"),
        ("/T/gamma", "value-of-gamma"),
    ]));
    let mut config = start_fake(pbx.clone()).await;
    config.read_timeout_ms = 200;
    let client = AmiClient::new(config);
    client.ping().await.unwrap();

    pbx.stall_next(Stall::Delay(Duration::from_millis(600)));
    assert_eq!(client.get_value("T", "alpha").await, "");
    assert!(!client.is_connected().await);

    assert_eq!(client.get_value("T", "beta").await, "value-of-beta");
    assert_eq!(client.get_value("T", "gamma").await, "value-of-gamma");
    assert_eq!(pbx.logins.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_truncated_reply_is_used_then_connection_replaced() {
    let pbx = Arc::new(FakePbx::with_rows(&[
        ("/T/alpha", "value-of-alpha"),
        ("/T/beta", "value-of-beta"),
    ]));
    let mut config = start_fake(pbx.clone()).await;
    config.read_timeout_ms = 200;
    let client = AmiClient::new(config);

    pbx.stall_next(Stall::Truncate(Duration::from_millis(400)));
    assert_eq!(client.get_value("T", "alpha").await, "value-of-alpha");
    assert!(!client.is_connected().await);

    // the late blank line must not end the next reply early
    assert_eq!(client.get_value("T", "beta").await, "value-of-beta");
    assert!(client.put_value("T", "gamma", "3").await);
    assert_eq!(client.get_value("T", "gamma").await, "3");
    assert_eq!(pbx.logins.load(Ordering::SeqCst), 2);
}
