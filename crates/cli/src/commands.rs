//! Subcommands.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Subcommand;
use corelib::{Entry, Id, MemoryNode, NodeRef, Url};
use tracing::info;
use transport::{Endpoints, State};

/// Identifier length in bytes for keys and node ids.
const ID_LEN: usize = 20;

/// Address proxies are scoped to when the caller has no node of its own.
const DEFAULT_FROM: &str = "oclocal://chordcom/";

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve an in-memory node on an address until the duration elapses.
    Serve {
        url: Url,
        /// Key hashed into the node id; defaults to the address.
        #[arg(long)]
        key: Option<String>,
        /// Address of the node to use as successor.
        #[arg(long)]
        successor: Option<Url>,
        /// Seconds to serve; runs until killed if omitted.
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Check that the node on an address answers.
    Ping {
        url: Url,
        #[arg(long, default_value = DEFAULT_FROM)]
        from: Url,
    },
    /// Ask a node for the successor of a key.
    FindSuccessor {
        url: Url,
        key: String,
        #[arg(long, default_value = DEFAULT_FROM)]
        from: Url,
    },
    /// Store a value under a key on a node.
    Insert {
        url: Url,
        key: String,
        value: String,
        #[arg(long, default_value = DEFAULT_FROM)]
        from: Url,
    },
    /// Fetch the values stored under a key on a node.
    Retrieve {
        url: Url,
        key: String,
        #[arg(long, default_value = DEFAULT_FROM)]
        from: Url,
    },
}

#[derive(Debug)]
pub enum CommandResult {
    Served { url: Url, id: Id },
    Pong { url: Url, id: Id },
    Successor { key: Id, id: Id, url: Url },
    Inserted { key: Id },
    Entries { key: Id, values: Vec<String> },
}

impl fmt::Display for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandResult::Served { url, id } => write!(f, "served {id} on {url}"),
            CommandResult::Pong { url, id } => write!(f, "{url} ({id}) is alive"),
            CommandResult::Successor { key, id, url } => {
                write!(f, "successor of {key}: {id} at {url}")
            }
            CommandResult::Inserted { key } => write!(f, "stored under {key}"),
            CommandResult::Entries { key, values } => {
                write!(f, "{} value(s) under {key}", values.len())?;
                for value in values {
                    write!(f, "\n  {value}")?;
                }
                Ok(())
            }
        }
    }
}

fn key_id(key: &str) -> Id {
    Id::from_key(key.as_bytes(), ID_LEN)
}

impl Command {
    pub fn execute(self, registry: &Arc<Endpoints>) -> anyhow::Result<CommandResult> {
        match self {
            Command::Serve {
                url,
                key,
                successor,
                seconds,
            } => serve(registry, url, key, successor, seconds),
            Command::Ping { url, from } => {
                let node = registry.connect(&from, &url)?;
                node.ping().with_context(|| format!("pinging {url}"))?;
                Ok(CommandResult::Pong {
                    id: node.id().clone(),
                    url,
                })
            }
            Command::FindSuccessor { url, key, from } => {
                let key = key_id(&key);
                let found = registry.connect(&from, &url)?.find_successor(&key)?;
                Ok(CommandResult::Successor {
                    id: found.id().clone(),
                    url: found.url().clone(),
                    key,
                })
            }
            Command::Insert { url, key, value, from } => {
                let key = key_id(&key);
                registry
                    .connect(&from, &url)?
                    .insert_entry(Entry::new(key.clone(), value.into_bytes()))?;
                Ok(CommandResult::Inserted { key })
            }
            Command::Retrieve { url, key, from } => {
                let key = key_id(&key);
                let entries = registry.connect(&from, &url)?.retrieve_entries(&key)?;
                let mut values: Vec<String> = entries
                    .iter()
                    .map(|e| String::from_utf8_lossy(e.value()).into_owned())
                    .collect();
                values.sort();
                Ok(CommandResult::Entries { key, values })
            }
        }
    }
}

fn serve(
    registry: &Arc<Endpoints>,
    url: Url,
    key: Option<String>,
    successor: Option<Url>,
    seconds: Option<u64>,
) -> anyhow::Result<CommandResult> {
    let id = key_id(key.as_deref().unwrap_or(url.as_str()));
    let node = MemoryNode::new(id.clone(), url.clone());
    let endpoint = registry.create_endpoint(NodeRef::from(node.clone()), url.clone())?;
    endpoint.register(Arc::new(|url: &Url, state: State| info!(%url, %state, "endpoint state")));

    endpoint.listen()?;
    if let Some(successor) = successor {
        let proxy = registry
            .connect(&url, &successor)
            .with_context(|| format!("connecting to successor {successor}"))?;
        node.set_successors(vec![proxy]);
    }
    endpoint.accept_entries()?;

    match seconds {
        Some(seconds) => thread::sleep(Duration::from_secs(seconds)),
        None => loop {
            thread::park();
        },
    }

    endpoint.disconnect();
    Ok(CommandResult::Served { url, id })
}
