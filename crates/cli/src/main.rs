//! # CLI - reftable interactive shell
//!
//! A REPL-style command-line interface driving a stack of reftable
//! files on disk, exercising the writer, reader, merged-stack reader,
//! compactor, and batch-update pipeline end to end. Reads commands from
//! stdin, executes them against the stack, and prints results to
//! stdout. Designed for both interactive use and scripted testing (pipe
//! commands via stdin).
//!
//! ## Commands
//!
//! ```text
//! UPDATE name hexid [message...]   Create/update a direct ref
//! SYMREF name target [message...]  Create/update a symbolic ref
//! DELETE name [message...]         Delete a ref (writes a tombstone)
//! GET name                         Show the ref's current merged value
//! LIST [prefix]                    List refs under an optional prefix
//! LOG name                         Show reflog entries, newest first
//! COMPACT                          Fold the whole stack into one table
//! STATS                            Print stack summary
//! EXIT / QUIT                      Shut down gracefully
//! ```
//!
//! ## Configuration
//!
//! All settings are controlled via environment variables:
//!
//! ```text
//! RIFT_DATA_DIR          Stack directory           (default: "data/reftables")
//! RIFT_REF_BLOCK_SIZE    Ref block size in bytes   (default: 4096)
//! RIFT_ALIGN_BLOCKS      Pad ref blocks to size    (default: "true")
//! RIFT_INDEX_OBJECTS     Build the object index    (default: "true")
//! RIFT_AUTHOR_NAME       Reflog author name        (default: "reftable-cli")
//! RIFT_AUTHOR_EMAIL      Reflog author email       (default: "cli@example.invalid")
//! ```
//!
//! ## Example
//!
//! ```text
//! $ cargo run -p reftable-cli
//! reftable-cli started (data_dir=data/reftables)
//! > UPDATE refs/heads/main 0123456789abcdef0123456789abcdef01234567
//! OK
//! > GET refs/heads/main
//! refs/heads/main -> 0123456789abcdef0123456789abcdef01234567
//! > EXIT
//! bye
//! ```

mod store;

use anyhow::{bail, Result};
use reftable::ObjectId;
use reftable_config::WriterOptions;
use reftable_update::{BatchUpdate, Command, LogRequest, NewValue, PermissiveRepository, SystemClock};
use std::io::{self, BufRead, Write};
use store::TableStack;

/// Reads a configuration value from the environment, falling back to `default`.
fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn writer_options() -> WriterOptions {
    let ref_block_size: u32 = env_or("RIFT_REF_BLOCK_SIZE", "4096").parse().unwrap_or(4096);
    let align_blocks: bool = env_or("RIFT_ALIGN_BLOCKS", "true").parse().unwrap_or(true);
    let index_objects: bool = env_or("RIFT_INDEX_OBJECTS", "true").parse().unwrap_or(true);
    WriterOptions::default()
        .ref_block_size(ref_block_size)
        .align_blocks(align_blocks)
        .index_objects(index_objects)
}

fn parse_object_id(hex: &str) -> Result<ObjectId> {
    if hex.len() != 40 {
        bail!("object id must be 40 hex characters, got {}", hex.len());
    }
    let mut bytes = [0u8; 20];
    for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
        let s = std::str::from_utf8(chunk)?;
        bytes[i] = u8::from_str_radix(s, 16)?;
    }
    Ok(ObjectId(bytes))
}

fn format_object_id(id: &ObjectId) -> String {
    id.as_bytes().iter().map(|b| format!("{b:02x}")).collect()
}

fn main() -> Result<()> {
    env_logger::init();

    let data_dir = env_or("RIFT_DATA_DIR", "data/reftables");
    let author_name = env_or("RIFT_AUTHOR_NAME", "reftable-cli");
    let author_email = env_or("RIFT_AUTHOR_EMAIL", "cli@example.invalid");
    let options = writer_options();
    let store = TableStack::open(&data_dir)?;

    println!("reftable-cli started (data_dir={data_dir})");
    println!("Commands: UPDATE name hexid | SYMREF name target | DELETE name");
    println!("          GET name | LIST [prefix] | LOG name | COMPACT | STATS | EXIT");
    print!("> ");
    io::stdout().flush().ok();

    let stdin = io::stdin();

    for line in stdin.lock().lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        if let Some(cmd) = parts.next() {
            let rest: Vec<&str> = parts.collect();
            match cmd.to_uppercase().as_str() {
                "UPDATE" => match run_update(&store, &options, &rest, &author_name, &author_email) {
                    Ok(()) => println!("OK"),
                    Err(e) => println!("ERR {e}"),
                },
                "SYMREF" => match run_symref(&store, &options, &rest, &author_name, &author_email) {
                    Ok(()) => println!("OK"),
                    Err(e) => println!("ERR {e}"),
                },
                "DELETE" => match run_delete(&store, &options, &rest, &author_name, &author_email) {
                    Ok(()) => println!("OK"),
                    Err(e) => println!("ERR {e}"),
                },
                "GET" => match run_get(&store, &rest) {
                    Ok(text) => println!("{text}"),
                    Err(e) => println!("ERR {e}"),
                },
                "LIST" => match run_list(&store, &rest) {
                    Ok(()) => {}
                    Err(e) => println!("ERR {e}"),
                },
                "LOG" => match run_log(&store, &rest) {
                    Ok(()) => {}
                    Err(e) => println!("ERR {e}"),
                },
                "COMPACT" => match store.compact_all(&options) {
                    Ok(path) => println!("OK (compacted into {})", path.display()),
                    Err(e) => println!("ERR compact failed: {e}"),
                },
                "STATS" => match run_stats(&store) {
                    Ok(()) => {}
                    Err(e) => println!("ERR {e}"),
                },
                "EXIT" | "QUIT" => {
                    println!("bye");
                    break;
                }
                other => {
                    println!("unknown command: {other}");
                }
            }
        }

        print!("> ");
        io::stdout().flush().ok();
    }

    Ok(())
}

fn run_update(
    store: &TableStack,
    options: &WriterOptions,
    args: &[&str],
    author_name: &str,
    author_email: &str,
) -> Result<()> {
    let [name, hexid, message @ ..] = args else {
        bail!("usage: UPDATE name hexid [message...]");
    };
    let id = parse_object_id(hexid)?;
    let command = Command::direct((*name).to_string(), id)
        .allow_non_fast_forward()
        .with_log(log_request(author_name, author_email, message, "update"));
    submit(store, options, command)
}

fn run_symref(
    store: &TableStack,
    options: &WriterOptions,
    args: &[&str],
    author_name: &str,
    author_email: &str,
) -> Result<()> {
    let [name, target, message @ ..] = args else {
        bail!("usage: SYMREF name target [message...]");
    };
    let command = Command {
        refname: (*name).to_string(),
        expected_old: None,
        new_value: NewValue::Symbolic((*target).to_string()),
        allow_non_fast_forward: true,
        log: Some(log_request(author_name, author_email, message, "symref")),
    };
    submit(store, options, command)
}

fn run_delete(
    store: &TableStack,
    options: &WriterOptions,
    args: &[&str],
    author_name: &str,
    author_email: &str,
) -> Result<()> {
    let [name, message @ ..] = args else {
        bail!("usage: DELETE name [message...]");
    };
    let command = Command::delete((*name).to_string())
        .with_log(log_request(author_name, author_email, message, "delete"));
    submit(store, options, command)
}

fn log_request(author_name: &str, author_email: &str, message: &[&str], verb: &str) -> LogRequest {
    let message = if message.is_empty() { verb.to_string() } else { message.join(" ") };
    LogRequest {
        author_name: author_name.to_string(),
        author_email: author_email.to_string(),
        tz_minutes: 0,
        message,
    }
}

fn submit(store: &TableStack, options: &WriterOptions, command: Command) -> Result<()> {
    let stack = store.load()?;
    let batch = BatchUpdate::new(true).push(command);
    let outcome = batch.apply(&stack, &PermissiveRepository, &SystemClock, options, Vec::new())?;
    match outcome.statuses.first() {
        Some(reftable_update::CommandStatus::Ok) => {
            let bytes = outcome.table.expect("Ok status implies a written table");
            store.publish(outcome.update_index, &bytes)?;
            Ok(())
        }
        Some(status) => bail!("rejected: {status:?}"),
        None => bail!("no command submitted"),
    }
}

fn run_get(store: &TableStack, args: &[&str]) -> Result<String> {
    let [name] = args else {
        bail!("usage: GET name");
    };
    let stack = store.load()?;
    match stack.exact_ref(name)? {
        None => Ok("(nil)".to_string()),
        Some(r) => Ok(describe_ref(&r)),
    }
}

fn describe_ref(r: &reftable::Ref) -> String {
    use reftable::RefValue;
    match &r.value {
        RefValue::Deletion => format!("{} -> (deleted)", r.name),
        RefValue::Unpeeled(id) => format!("{} -> {}", r.name, format_object_id(id)),
        RefValue::Peeled { tag, target } => {
            format!("{} -> {} (peels to {})", r.name, format_object_id(tag), format_object_id(target))
        }
        RefValue::Symbolic(target) => format!("{} -> ref: {}", r.name, target),
    }
}

fn run_list(store: &TableStack, args: &[&str]) -> Result<()> {
    let prefix = args.first().copied().unwrap_or("");
    let stack = store.load()?;
    let mut cursor = if prefix.is_empty() {
        stack.merged_refs(false)?
    } else {
        let p = if prefix.ends_with('/') { prefix.to_string() } else { format!("{prefix}/") };
        stack.seek_ref(&p, false)?
    };
    let mut count = 0;
    while let Some(r) = cursor.next()? {
        println!("{}", describe_ref(&r));
        count += 1;
    }
    println!("({count} entries)");
    Ok(())
}

fn run_log(store: &TableStack, args: &[&str]) -> Result<()> {
    let [name] = args else {
        bail!("usage: LOG name");
    };
    let stack = store.load()?;
    let mut cursor = stack.seek_log(name, u64::MAX, false)?;
    let mut count = 0;
    while let Some(entry) = cursor.next()? {
        if entry.refname != *name {
            break;
        }
        if let Some(data) = &entry.data {
            println!(
                "{} updateIndex={} {} -> {} {} <{}> {}",
                entry.refname,
                entry.update_index,
                format_object_id(&data.old_id),
                format_object_id(&data.new_id),
                data.name,
                data.email,
                data.message
            );
        } else {
            println!("{} updateIndex={} (deleted)", entry.refname, entry.update_index);
        }
        count += 1;
    }
    println!("({count} entries)");
    Ok(())
}

fn run_stats(store: &TableStack) -> Result<()> {
    let stack = store.load()?;
    println!(
        "dir={} tables={} maxUpdateIndex={}",
        store.dir().display(),
        stack.len(),
        stack.max_update_index()
    );
    Ok(())
}
