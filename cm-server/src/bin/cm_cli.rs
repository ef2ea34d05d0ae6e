//! Admin command dispatcher (§6, §10.3).
//!
//! A REPL gated by local interactive authentication against the same
//! user table the server authenticates callers against. Commands are
//! two words plus arguments split on whitespace — the reference's own
//! parser has the same limitation, so a credential containing a space
//! cannot be passed as a bare argument (§9 open question, left as-is
//! rather than silently "fixed" into different behavior than documented).

use std::io::{self, Write};
use std::sync::Arc;

use cm::config::ServerConfig;
use cm::context::ServerContext;
use cm::{auth, rotator};
use cm_crypto::password;

const HELP_TEXT: &str = "\
Commands:
  CREATE USER <username> <password>
  DELETE USER <username>
  LIST USERS
  CREATE PERMISSION <label> <username>
  DELETE PERMISSION <label> <username>
  LIST PERMISSIONS
  CREATE CREDENTIALS <label> <path-to-json>
  DELETE CREDENTIALS <label>
  LIST CREDENTIALS
  ROTATE CREDENTIALS <label>
  TEST CONNECTION <label>
  HELP
  EXIT";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter("cm_cli=info").init();

    let config_path = std::env::var("CM_CONFIG").unwrap_or_else(|_| "cm.json".into());
    let config = ServerConfig::load(&config_path)?;
    let ctx = ServerContext::from_config(&config).await?;

    let admin_username = prompt("admin username: ")?;
    let admin_password = prompt("admin password: ")?;
    if auth::authenticate(ctx.store.as_ref(), &admin_username, &admin_password).await.is_err() {
        eprintln!("authentication failed");
        std::process::exit(1);
    }

    println!("cm-cli — type HELP for commands, EXIT to quit");
    loop {
        let line = prompt("cm> ")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let words: Vec<&str> = line.split_whitespace().collect();
        match dispatch(&ctx, &words).await {
            Ok(Outcome::Continue) => {}
            Ok(Outcome::Exit) => break,
            Err(e) => eprintln!("error: {}", e),
        }
    }
    Ok(())
}

enum Outcome {
    Continue,
    Exit,
}

async fn dispatch(ctx: &ServerContext, words: &[&str]) -> Result<Outcome, Box<dyn std::error::Error>> {
    let upper: Vec<String> = words.iter().map(|w| w.to_uppercase()).collect();
    let cmd = (upper.first().map(String::as_str).unwrap_or(""), upper.get(1).map(String::as_str).unwrap_or(""));

    match cmd {
        ("HELP", _) if words.len() == 1 => println!("{}", HELP_TEXT),
        ("EXIT", _) if words.len() == 1 => return Ok(Outcome::Exit),

        ("CREATE", "USER") if words.len() == 4 => {
            let hashed = password::hash_and_salt(words[3])?;
            ctx.store.put_user(words[2], hashed.salt.to_vec(), hashed.hash.into_bytes()).await?;
            println!("created user {}", words[2]);
        }
        ("DELETE", "USER") if words.len() == 3 => {
            ctx.store.delete_user(words[2]).await?;
            println!("deleted user {}", words[2]);
        }
        ("LIST", "USERS") if words.len() == 2 => {
            for summary in ctx.store.list_users().await? {
                println!("{}\t{}\t{}...", summary.uid.0, summary.username, summary.hash_prefix);
            }
        }

        ("CREATE", "PERMISSION") if words.len() == 4 => {
            let label = words[2];
            let username = words[3];
            let user = ctx.store.fetch_user(username).await?.ok_or("no such user")?;
            let credential = ctx.store.fetch_credential(label).await?.ok_or("no such credential")?;
            ctx.store.put_permission(user.uid, credential.cr_id).await?;
            println!("granted {} on {} to {}", label, credential.cr_id.0, username);
        }
        ("DELETE", "PERMISSION") if words.len() == 4 => {
            let label = words[2];
            let username = words[3];
            let user = ctx.store.fetch_user(username).await?.ok_or("no such user")?;
            let credential = ctx.store.fetch_credential(label).await?.ok_or("no such credential")?;
            ctx.store.delete_permission(user.uid, credential.cr_id).await?;
            println!("revoked {} from {}", label, username);
        }
        ("LIST", "PERMISSIONS") if words.len() == 2 => {
            for perm in ctx.store.list_permissions().await? {
                println!("uid={} cr_id={}", perm.uid.0, perm.cr_id.0);
            }
        }

        ("CREATE", "CREDENTIALS") if words.len() == 4 => {
            let label = words[2];
            let json_path = words[3];
            let raw = std::fs::read_to_string(json_path)?;
            let payload: serde_json::Value = serde_json::from_str(&raw)?;

            let dk = cm_crypto::DataKey::generate()?;
            let ciphertext = cm_crypto::cipher::encrypt(&dk, &payload)?;
            let wrapped = ctx.hsm.wrap(&dk)?;

            let cr_id = ctx.store.put_credential(label, ciphertext).await?;
            ctx.store.put_data_key(cr_id, wrapped.key_bytes().to_vec(), wrapped.key_iv().to_vec(), wrapped.cr_iv().to_vec()).await?;
            println!("created credential {} (cr_id={})", label, cr_id.0);
        }
        ("DELETE", "CREDENTIALS") if words.len() == 3 => {
            ctx.store.delete_credential(words[2]).await?;
            println!("deleted credential {}", words[2]);
        }
        ("LIST", "CREDENTIALS") if words.len() == 2 => {
            for credential in ctx.store.list_credentials().await? {
                println!("{}\t{}", credential.cr_id.0, credential.label);
            }
        }

        ("ROTATE", "CREDENTIALS") if words.len() == 3 => {
            let adapter = cm_mysql_adapter();
            match rotator::rotate(ctx.store.as_ref(), ctx.hsm.as_ref(), ctx.audit.as_ref(), adapter.as_ref(), words[2], None).await {
                Ok(stage) => println!("rotation reached {:?}", stage),
                Err(e) => eprintln!("rotation failed: {}", e),
            }
        }
        ("TEST", "CONNECTION") if words.len() == 3 => {
            let label = words[2];
            let adapter = cm_mysql_adapter();
            match rotator::fetch_connection_params(ctx.store.as_ref(), ctx.hsm.as_ref(), label).await {
                Ok(params) => match adapter.connect(&params).await {
                    Ok(()) => println!("connection to {} succeeded", label),
                    Err(e) => eprintln!("connection to {} failed: {}", label, e),
                },
                Err(e) => eprintln!("could not load credential {}: {}", label, e),
            }
        }

        _ => eprintln!("unrecognized command, type HELP"),
    }
    Ok(Outcome::Continue)
}

/// Placeholder adapter construction; a real deployment selects the
/// adapter implementation matching its configured database driver.
fn cm_mysql_adapter() -> Arc<dyn rotator::TargetDbAdapter> {
    struct Unconfigured;
    #[async_trait::async_trait]
    impl rotator::TargetDbAdapter for Unconfigured {
        async fn connect(&self, _params: &rotator::ConnectionParams) -> Result<(), String> {
            Err("no TargetDbAdapter configured for this deployment".into())
        }
        async fn change_password(&self, _params: &rotator::ConnectionParams, _new_password: &str) -> Result<(), String> {
            Err("no TargetDbAdapter configured for this deployment".into())
        }
    }
    Arc::new(Unconfigured)
}

fn prompt(label: &str) -> io::Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim_end().to_string())
}
