use std::fmt::Write as _;
use std::io::{self, BufRead, Read};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use indexmap::IndexSet;
use serde::Serialize;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;

use crate::config::AppConfig;
use crate::highlight::{highlight, HighlightStyle};
use crate::search::{
    contains_normalized, normalize_for_search, snippet_for_query, ChatSearchCoordinator,
    LoadedMessage, SearchResult, SearchState, SearchStores,
};
use crate::storage::{MessageRecord, NewAttachment, NewMessage, StorageHandle};

#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    /// Chat to search; repeat for merged conversations
    #[arg(long = "chat", required = true)]
    pub chats: Vec<String>,
    /// Number of newest messages treated as loaded (defaults to window_size)
    #[arg(long)]
    pub window: Option<usize>,
    /// Print the results as JSON
    #[arg(long)]
    pub json: bool,
    /// Search query
    #[arg(required = true)]
    pub query: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct AddArgs {
    /// Chat the message belongs to (created on first use)
    #[arg(long)]
    pub chat: String,
    /// Optional message subject
    #[arg(long)]
    pub subject: Option<String>,
    /// Attachment file name; repeat for several
    #[arg(long = "attach")]
    pub attachments: Vec<String>,
    /// Mark the message as sent by the local user
    #[arg(long)]
    pub from_me: bool,
    /// Message text. If omitted, reads from stdin.
    #[arg()]
    pub text: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct InteractiveArgs {
    /// Chat to search; repeat for merged conversations
    #[arg(long = "chat", required = true)]
    pub chats: Vec<String>,
    /// Number of newest messages treated as loaded (defaults to window_size)
    #[arg(long)]
    pub window: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionCommand {
    Query(String),
    Next,
    Previous,
    ToggleSheet,
    Close,
    Quit,
    Unknown(String),
}

impl SessionCommand {
    fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        match trimmed {
            ":next" | ":n" => Self::Next,
            ":prev" | ":p" => Self::Previous,
            ":sheet" => Self::ToggleSheet,
            ":close" => Self::Close,
            ":quit" | ":q" => Self::Quit,
            other if other.starts_with(':') => Self::Unknown(other.to_string()),
            _ => Self::Query(line.trim_end_matches(['\r', '\n']).to_string()),
        }
    }
}

/// The loaded conversation window, oldest first like a chat view.
struct Conversation {
    chats: Vec<String>,
    records: Arc<[MessageRecord]>,
    window: Arc<[LoadedMessage]>,
}

impl Conversation {
    fn load(storage: &StorageHandle, requested: &[String], size: usize) -> Result<Self> {
        let chats = resolve_chats(storage, requested)?;
        let mut records = storage
            .fetch_recent_messages(&chats, size)
            .context("loading conversation window")?;
        records.reverse();
        let window = records.iter().map(LoadedMessage::from).collect::<Vec<_>>();
        Ok(Self {
            chats,
            records: records.into(),
            window: window.into(),
        })
    }

    fn coordinator(
        &self,
        runtime: &Runtime,
        config: &AppConfig,
        storage: StorageHandle,
    ) -> ChatSearchCoordinator {
        ChatSearchCoordinator::new(
            self.chats.clone(),
            SearchStores::shared(Arc::new(storage)),
            config.search.clone(),
            runtime.handle().clone(),
        )
    }
}

fn resolve_chats(storage: &StorageHandle, requested: &[String]) -> Result<Vec<String>> {
    let mut chats = IndexSet::new();
    for guid in requested {
        let guid = guid.trim();
        if guid.is_empty() {
            continue;
        }
        if storage.find_chat(guid)?.is_none() {
            bail!("chat '{guid}' not found");
        }
        chats.insert(guid.to_string());
    }
    if chats.is_empty() {
        bail!("at least one chat is required");
    }
    Ok(chats.into_iter().collect())
}

pub fn search_messages(
    runtime: &Runtime,
    config: &AppConfig,
    storage: StorageHandle,
    args: SearchArgs,
) -> Result<()> {
    let style = if atty::is(atty::Stream::Stdout) && !args.json {
        HighlightStyle::ANSI
    } else {
        HighlightStyle::BRACKETS
    };
    let output = run_search(runtime, config, storage, &args, style)?;
    print!("{output}");
    Ok(())
}

fn run_search(
    runtime: &Runtime,
    config: &AppConfig,
    storage: StorageHandle,
    args: &SearchArgs,
    style: HighlightStyle,
) -> Result<String> {
    let query = args.query.join(" ");
    let query = query.trim();
    if query.is_empty() {
        bail!("search query cannot be empty");
    }

    let conversation = Conversation::load(
        &storage,
        &args.chats,
        args.window.unwrap_or(config.window_size),
    )?;
    let mut search = conversation.coordinator(runtime, config, storage);
    search.activate_search();
    search.update_search_query(query, conversation.window.clone());
    runtime.block_on(search.settle());
    let state = search.state();

    if args.json {
        let report = SearchReport::new(&state, &conversation.records, config);
        return serde_json::to_string_pretty(&report)
            .map(|json| json + "\n")
            .context("serializing search results");
    }
    Ok(format_search_report(
        &state,
        &conversation.records,
        config.search.snippet_length,
        style,
    ))
}

#[derive(Serialize)]
struct SearchReport<'a> {
    query: &'a str,
    loaded_matches: Vec<LoadedMatch<'a>>,
    results: &'a [SearchResult],
}

#[derive(Serialize)]
struct LoadedMatch<'a> {
    position: usize,
    message_guid: &'a str,
    chat_guid: &'a str,
    timestamp: i64,
    snippet: String,
}

impl<'a> SearchReport<'a> {
    fn new(state: &'a SearchState, records: &'a [MessageRecord], config: &AppConfig) -> Self {
        let loaded_matches = state
            .match_indices
            .iter()
            .filter_map(|&position| {
                let record = records.get(position)?;
                Some(LoadedMatch {
                    position,
                    message_guid: &record.guid,
                    chat_guid: &record.chat_guid,
                    timestamp: record.date_created,
                    snippet: loaded_snippet(record, &state.query, config.search.snippet_length),
                })
            })
            .collect();
        Self {
            query: &state.query,
            loaded_matches,
            results: &state.database_results,
        }
    }
}

/// Excerpt of the first field of a loaded message that contains the query.
fn loaded_snippet(record: &MessageRecord, query: &str, max_len: usize) -> String {
    let folded = normalize_for_search(query.trim());
    let source = record
        .text
        .iter()
        .chain(record.subject.iter())
        .chain(record.attachment_names.iter())
        .find(|field| contains_normalized(field, &folded))
        .or(record.text.as_ref())
        .or(record.subject.as_ref())
        .map(String::as_str)
        .unwrap_or_default();
    snippet_for_query(source, query, max_len)
}

fn format_search_report(
    state: &SearchState,
    records: &[MessageRecord],
    snippet_length: usize,
    style: HighlightStyle,
) -> String {
    let mut out = String::new();
    let _ = writeln!(
        &mut out,
        "\"{}\": {} in loaded window, {} in history",
        state.query,
        state.match_count(),
        state.database_results.len()
    );
    if !state.match_indices.is_empty() {
        out.push('\n');
        let _ = writeln!(&mut out, "Loaded window");
        for (rank, &position) in state.match_indices.iter().enumerate() {
            let Some(record) = records.get(position) else {
                continue;
            };
            let snippet = loaded_snippet(record, &state.query, snippet_length);
            let _ = writeln!(
                &mut out,
                "  {:>2}. {}  {}  {}",
                rank + 1,
                format_timestamp(record.date_created),
                if record.is_from_me { "me  " } else { "them" },
                highlight(&snippet, &state.query, style)
            );
        }
    }
    if !state.database_results.is_empty() {
        out.push('\n');
        let _ = writeln!(&mut out, "History");
        for result in &state.database_results {
            let _ = writeln!(&mut out, "{}", format_result(result, &state.query, style));
        }
    }
    out
}

fn format_result(result: &SearchResult, query: &str, style: HighlightStyle) -> String {
    let mut line = format!(
        "  {}  {:<15}  {}",
        format_timestamp(result.timestamp),
        result.match_type.to_string(),
        highlight(&result.snippet, query, style)
    );
    if result.is_loaded_in_memory {
        line.push_str("  (loaded)");
    }
    line
}

pub fn add_message(storage: &StorageHandle, args: AddArgs) -> Result<()> {
    let chat = args.chat.trim();
    if chat.is_empty() {
        bail!("chat guid cannot be empty");
    }
    let text = match args.text {
        Some(text) => Some(text),
        None => read_stdin()?.map(|text| text.trim_end().to_string()),
    }
    .filter(|text| !text.trim().is_empty());

    storage
        .create_chat(chat, None)
        .with_context(|| format!("creating chat '{chat}'"))?;
    let message = NewMessage {
        chat_guid: chat.to_string(),
        text,
        subject: args.subject.filter(|subject| !subject.trim().is_empty()),
        date_created: None,
        is_from_me: args.from_me,
        attachments: args
            .attachments
            .into_iter()
            .map(|name| NewAttachment {
                transfer_name: name,
                mime_type: None,
            })
            .collect(),
    };
    let guid = storage
        .insert_message(&message)
        .with_context(|| format!("storing message in chat '{chat}'"))?;
    println!("Stored message {guid} in {chat}");
    Ok(())
}

pub fn list_chats(storage: &StorageHandle) -> Result<()> {
    print!("{}", format_chats(storage)?);
    Ok(())
}

fn format_chats(storage: &StorageHandle) -> Result<String> {
    let chats = storage.list_chats().context("listing chats")?;
    if chats.is_empty() {
        return Ok("No chats yet.\n".to_string());
    }
    let mut out = String::new();
    for chat in chats {
        let plural = if chat.message_count == 1 { "" } else { "s" };
        let _ = write!(&mut out, "{}  {} message{plural}", chat.guid, chat.message_count);
        if let Some(name) = chat.display_name.as_deref() {
            let _ = write!(&mut out, "  ({name})");
        }
        out.push('\n');
    }
    Ok(out)
}

pub fn interactive(
    runtime: &Runtime,
    config: &AppConfig,
    storage: StorageHandle,
    args: InteractiveArgs,
) -> Result<()> {
    let conversation = Conversation::load(
        &storage,
        &args.chats,
        args.window.unwrap_or(config.window_size),
    )?;
    let style = if atty::is(atty::Stream::Stdout) {
        HighlightStyle::ANSI
    } else {
        HighlightStyle::BRACKETS
    };
    eprintln!(
        "{} messages loaded. Type a query; :next :prev :sheet :close :quit",
        conversation.records.len()
    );

    let mut search = conversation.coordinator(runtime, config, storage);
    let printer = spawn_state_printer(
        runtime,
        &search,
        conversation.records.clone(),
        config.search.snippet_length,
        style,
    );
    search.activate_search();
    let stdin = io::stdin();
    let outcome = run_session(runtime, &mut search, &conversation.window, stdin.lock());

    drop(search);
    let _ = runtime.block_on(printer);
    outcome
}

fn run_session<R: BufRead>(
    runtime: &Runtime,
    search: &mut ChatSearchCoordinator,
    window: &Arc<[LoadedMessage]>,
    input: R,
) -> Result<()> {
    for line in input.lines() {
        let line = line.context("reading session input")?;
        match SessionCommand::parse(&line) {
            SessionCommand::Query(query) => {
                if !search.state().is_active {
                    search.activate_search();
                }
                search.update_search_query(&query, window.clone());
                runtime.block_on(search.settle());
            }
            SessionCommand::Next => search.navigate_search_down(),
            SessionCommand::Previous => search.navigate_search_up(),
            SessionCommand::ToggleSheet => {
                if search.state().show_results_sheet {
                    search.hide_results_sheet();
                } else {
                    search.show_results_sheet();
                }
            }
            SessionCommand::Close => search.close_search(),
            SessionCommand::Quit => break,
            SessionCommand::Unknown(command) => {
                tracing::warn!(%command, "unknown session command");
            }
        }
    }
    Ok(())
}

/// Prints every state the coordinator publishes until it is dropped.
fn spawn_state_printer(
    runtime: &Runtime,
    search: &ChatSearchCoordinator,
    records: Arc<[MessageRecord]>,
    snippet_length: usize,
    style: HighlightStyle,
) -> JoinHandle<()> {
    let mut updates = search.subscribe();
    runtime.spawn(async move {
        while updates.changed().await.is_ok() {
            let state = updates.borrow_and_update().clone();
            print!("{}", describe_state(&state, &records, snippet_length, style));
        }
    })
}

fn describe_state(
    state: &SearchState,
    records: &[MessageRecord],
    snippet_length: usize,
    style: HighlightStyle,
) -> String {
    if !state.is_active {
        return "search closed\n".to_string();
    }
    if !state.has_query() {
        return "search open\n".to_string();
    }

    let mut out = format!("\"{}\": ", state.query);
    match state.match_count() {
        0 => out.push_str("no loaded matches"),
        count => {
            let _ = write!(
                &mut out,
                "{}/{count} loaded",
                state.current_match_index + 1
            );
        }
    }
    if state.is_searching_database {
        out.push_str(", searching history");
    } else if !state.database_results.is_empty() {
        let _ = write!(&mut out, ", {} in history", state.database_results.len());
    }
    out.push('\n');

    if let Some(record) = state
        .current_message_position()
        .and_then(|position| records.get(position))
    {
        let snippet = loaded_snippet(record, &state.query, snippet_length);
        let _ = writeln!(
            &mut out,
            "  > {}  {}",
            format_timestamp(record.date_created),
            highlight(&snippet, &state.query, style)
        );
    }
    if state.show_results_sheet {
        for result in &state.database_results {
            let _ = writeln!(&mut out, "{}", format_result(result, &state.query, style));
        }
    }
    out
}

fn read_stdin() -> Result<Option<String>> {
    if atty::is(atty::Stream::Stdin) {
        return Ok(None);
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(Some(buf))
}

/// RFC 3339 rendering of a millisecond Unix timestamp.
fn format_timestamp(millis: i64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .map(|dt| dt.format(&Rfc3339).unwrap_or_else(|_| millis.to_string()))
        .unwrap_or_else(|_| millis.to_string())
}
