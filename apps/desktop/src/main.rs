mod commands;
mod config;

use std::{
    io::Write as _,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{
    http_backend::HttpBackend,
    simulated::{
        SimulatedBackend, TestAccountAuthProvider, DEFAULT_TEST_EMAIL, DEFAULT_TEST_PASSWORD,
    },
    ApplicationShell, Frame, MountedView, NoticeLevel, NotificationSink, ShellDependencies,
};
use shared::{
    domain::DeliveryStatus,
    error::CoreError,
    protocol::{Analysis, Document, ProfileUpdate, UploadFile},
    route::Route,
};
use storage::SqliteStore;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::{
    commands::{parse_command, Command, HELP},
    config::{load_settings, Settings, DEFAULT_CONFIG_FILE},
};

#[derive(Parser, Debug)]
#[command(name = "lexdesk", about = "Legal document analysis client")]
struct Args {
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[arg(long)]
    data_dir: Option<PathBuf>,
    #[arg(long)]
    database_url: Option<String>,
    /// REST backend to use instead of the built-in simulation.
    #[arg(long)]
    api_base_url: Option<String>,
    #[arg(long)]
    upload_tick_ms: Option<u64>,
    #[arg(long)]
    simulated_latency_ms: Option<u64>,
    #[arg(long)]
    log_filter: Option<String>,
}

impl Args {
    fn apply_to(self, settings: &mut Settings) {
        if let Some(v) = self.data_dir {
            settings.data_dir = v;
        }
        if let Some(v) = self.database_url {
            settings.database_url = Some(v);
        }
        if let Some(v) = self.api_base_url {
            settings.api_base_url = Some(v);
        }
        if let Some(v) = self.upload_tick_ms {
            settings.upload_tick_ms = v;
        }
        if let Some(v) = self.simulated_latency_ms {
            settings.simulated_latency_ms = v;
        }
        if let Some(v) = self.log_filter {
            settings.log_filter = v;
        }
    }
}

/// Prints notices inline with command output.
struct ConsoleNotificationSink;

impl NotificationSink for ConsoleNotificationSink {
    fn notify(&self, level: NoticeLevel, message: &str) {
        match level {
            NoticeLevel::Success => println!("[ok] {message}"),
            NoticeLevel::Error => println!("[error] {message}"),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut settings = load_settings(&args.config);
    args.apply_to(&mut settings);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.log_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let database_url = settings.resolved_database_url();
    let store = Arc::new(
        SqliteStore::new(&database_url)
            .await
            .with_context(|| format!("failed to open session store at {database_url}"))?,
    );

    let deps = match &settings.api_base_url {
        Some(api_base_url) => {
            info!("lexdesk: using backend at {api_base_url}");
            ShellDependencies::http(store.clone(), HttpBackend::new(api_base_url)?)
        }
        None => {
            let latency = Duration::from_millis(settings.simulated_latency_ms);
            info!("lexdesk: using simulated backend latency={latency:?}");
            println!("offline mode: sign in with {DEFAULT_TEST_EMAIL} / {DEFAULT_TEST_PASSWORD}");
            ShellDependencies::simulated(
                store.clone(),
                TestAccountAuthProvider::new(DEFAULT_TEST_EMAIL, DEFAULT_TEST_PASSWORD, latency),
                SimulatedBackend::with_seeded_history(latency),
            )
        }
    }
    .with_notifier(Arc::new(ConsoleNotificationSink))
    .with_upload_tick(Duration::from_millis(settings.upload_tick_ms));

    let shell = ApplicationShell::start(deps).await;
    let mut events = shell.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => debug!("lexdesk: event {event:?}"),
                Err(RecvError::Lagged(skipped)) => debug!("lexdesk: skipped {skipped} events"),
                Err(RecvError::Closed) => break,
            }
        }
    });
    print_frame(&shell.render().await);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };

        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(err) => {
                println!("{err}");
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }

        if let Err(err) = run_command(&shell, command).await {
            // The shell has already shown its own errors as notices.
            match err.downcast_ref::<CoreError>() {
                Some(core) => debug!("lexdesk: command failed code={:?}: {core}", core.code()),
                None => println!("[error] {err:#}"),
            }
        }
    }

    store.close().await;
    Ok(())
}

async fn run_command(shell: &ApplicationShell, command: Command) -> Result<()> {
    match command {
        Command::Login { email, password } => {
            shell.login(&email, &password).await?;
            shell.refresh_documents().await?;
            print_frame(&shell.render().await);
        }
        Command::Signup { email, password } => {
            shell.signup(&email, &password).await?;
            print_frame(&shell.render().await);
        }
        Command::Logout => {
            shell.logout().await?;
            print_frame(&shell.render().await);
        }
        Command::Whoami => match shell.session().current().await {
            Some(session) => println!("{} <{}> ({})", session.label(), session.email, session.id),
            None => println!("not signed in"),
        },
        Command::Profile { display_name } => {
            shell
                .update_profile(ProfileUpdate {
                    display_name: Some(display_name),
                })
                .await?;
        }
        Command::Go(route) => {
            shell.navigate(route).await;
            print_frame(&shell.render().await);
        }
        Command::Upload { path } => upload(shell, &path).await?,
        Command::Docs => {
            shell.refresh_documents().await?;
            shell.navigate(Route::Dashboard).await;
            print_frame(&shell.render().await);
        }
        Command::Analysis { document_id } => {
            shell.open_analysis(&document_id).await?;
            print_frame(&shell.render().await);
        }
        Command::Chat { document_id, text } => {
            shell
                .navigate(Route::Chat {
                    document_id: document_id.clone(),
                })
                .await;
            shell.send_message(&document_id, &text).await?;
            print_frame(&shell.render().await);
        }
        Command::Render => print_frame(&shell.render().await),
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
    Ok(())
}

async fn upload(shell: &ApplicationShell, path: &Path) -> Result<()> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .with_context(|| format!("{} has no file name", path.display()))?;
    let content_type = mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string();

    shell.navigate(Route::Upload).await;
    let handle = shell
        .upload(UploadFile {
            name,
            content_type,
            bytes,
        })
        .await?;
    println!("uploading {} as {}", handle.document().name, handle.document().id);

    let mut progress = handle.progress();
    let wait = handle.wait();
    tokio::pin!(wait);
    let outcome = loop {
        tokio::select! {
            outcome = &mut wait => break outcome,
            changed = progress.changed() => match changed {
                Ok(()) => println!("  {:>3}%", *progress.borrow_and_update()),
                Err(_) => break (&mut wait).await,
            },
        }
    };

    let document = outcome?;
    println!("view it with: analysis {}", document.id);
    Ok(())
}

fn print_frame(frame: &Frame) {
    let who = frame
        .session
        .as_ref()
        .map(|session| session.label().to_string())
        .unwrap_or_else(|| "signed out".to_string());
    println!("== {} [{who}] ==", frame.route);

    match &frame.mounted {
        MountedView::Auth => println!("sign in with: login <email> <password>"),
        MountedView::Dashboard { documents } => print_documents(documents),
        MountedView::Upload => println!("choose a file with: upload <path>"),
        MountedView::Analysis { document, analysis } => print_analysis(document, analysis),
        MountedView::Chat {
            document,
            conversation,
        } => {
            println!("chatting about {}", document.name);
            for message in &conversation.messages {
                let marker = match message.delivery_status {
                    Some(DeliveryStatus::Sending) => " (sending)",
                    Some(DeliveryStatus::Error) => " (not delivered)",
                    _ => "",
                };
                println!("  {:?}: {}{marker}", message.role, message.content);
            }
        }
        MountedView::Profile { session } => {
            println!("email:        {}", session.email);
            println!("display name: {}", session.display_name.as_deref().unwrap_or("-"));
        }
        MountedView::Unavailable {
            document_id,
            reason,
        } => println!("document {document_id} is not available: {reason}"),
    }
}

fn print_documents(documents: &[Document]) {
    if documents.is_empty() {
        println!("no documents yet; try: upload <path>");
        return;
    }
    for document in documents {
        let risk = document
            .risk_level()
            .map(|risk| format!(" {risk} risk"))
            .unwrap_or_default();
        println!(
            "  {:<32} {:<28} {:?}{risk}  {}",
            document.id.as_str(),
            document.name,
            document.status(),
            document.uploaded_at.format("%Y-%m-%d %H:%M")
        );
    }
}

fn print_analysis(document: &Document, analysis: &Analysis) {
    println!("{} ({})", document.name, document.kind);
    println!("{}", analysis.summary);
    if !analysis.risks.is_empty() {
        println!("risks:");
        for risk in &analysis.risks {
            println!("  [{}] {}: {}", risk.severity, risk.kind, risk.description);
            println!("      -> {}", risk.recommendation);
        }
    }
    if !analysis.obligations.is_empty() {
        println!("obligations:");
        for obligation in &analysis.obligations {
            let deadline = obligation
                .deadline
                .map(|date| format!(" by {date}"))
                .unwrap_or_default();
            println!(
                "  {}: {}{deadline} ({:?})",
                obligation.party, obligation.description, obligation.status
            );
        }
    }
    if !analysis.important_dates.is_empty() {
        println!("dates:");
        for date in &analysis.important_dates {
            println!("  {} {} [{}]", date.date, date.description, date.category);
        }
    }
    if !analysis.key_terms.is_empty() {
        println!("key terms:");
        for term in &analysis.key_terms {
            println!("  {}: {}", term.term, term.definition);
        }
    }
    if !analysis.financial_terms.is_empty() {
        println!("financial terms:");
        for term in &analysis.financial_terms {
            println!("  {}: {}", term.description, term.amount);
        }
    }
    if !analysis.parties.is_empty() {
        println!("parties:");
        for party in &analysis.parties {
            println!("  {} ({}): {}", party.name, party.role, party.responsibilities.join(", "));
        }
    }
}
