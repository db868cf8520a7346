// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! llamalink CLI - drive an Ollama server from the terminal.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};

use llamalink::{
    format_bytes, format_eta, format_speed, ChatMessage, ChatRequest, ChatSettings, ClientConfig,
    Connectivity, OllamaClient, PullPhase, RequestTimeout, ThinkMode, DEFAULT_HOST,
};

#[derive(Parser)]
#[command(name = "llamalink", version, about = "Streaming Ollama API client")]
struct Cli {
    /// Ollama host; the http:// or https:// prefix is optional
    #[arg(long, global = true, default_value = DEFAULT_HOST)]
    host: String,

    /// Time allowed for the server to start responding: 30s, 60s, 5min, unlimited
    #[arg(long, global = true, value_parser = parse_timeout, default_value = "60s")]
    timeout: RequestTimeout,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List models available on the server
    List,
    /// Download a model, with live progress
    Pull { model: String },
    /// Delete a model
    Rm { model: String },
    /// Show model details
    Show { model: String },
    /// List currently loaded models
    Ps,
    /// Print the server version
    Version,
    /// Probe connectivity to the server
    Check,
    /// Send a chat prompt and stream the reply
    Chat {
        model: String,
        /// The prompt text
        prompt: Vec<String>,
        /// System prompt inserted at the start of the conversation
        #[arg(long)]
        system: Option<String>,
        /// Sampling temperature
        #[arg(long)]
        temperature: Option<f64>,
        /// Context window size
        #[arg(long)]
        num_ctx: Option<u32>,
        /// Enable or disable model thinking (omit to leave it to the model)
        #[arg(long)]
        think: Option<bool>,
        /// Wait for the full reply instead of streaming
        #[arg(long)]
        no_stream: bool,
    },
}

fn parse_timeout(raw: &str) -> Result<RequestTimeout, String> {
    match raw {
        "30s" => Ok(RequestTimeout::Secs30),
        "60s" => Ok(RequestTimeout::Secs60),
        "5min" => Ok(RequestTimeout::Mins5),
        "unlimited" => Ok(RequestTimeout::Unlimited),
        _ => Err(format!(
            "unknown timeout '{}': expected 30s, 60s, 5min, or unlimited",
            raw
        )),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = ClientConfig::new(cli.host);
    config.timeout = cli.timeout;
    let client = OllamaClient::with_config(config);

    match cli.command {
        Command::List => cmd_list(&client).await,
        Command::Pull { model } => cmd_pull(&client, &model).await,
        Command::Rm { model } => cmd_rm(&client, &model).await,
        Command::Show { model } => cmd_show(&client, &model).await,
        Command::Ps => cmd_ps(&client).await,
        Command::Version => cmd_version(&client).await,
        Command::Check => cmd_check(&client).await,
        Command::Chat {
            model,
            prompt,
            system,
            temperature,
            num_ctx,
            think,
            no_stream,
        } => {
            let settings = ChatSettings {
                temperature,
                num_ctx,
                system_prompt: system,
                think: match think {
                    None => ThinkMode::Unset,
                    Some(true) => ThinkMode::On,
                    Some(false) => ThinkMode::Off,
                },
                tools: None,
            };
            cmd_chat(&client, &model, prompt.join(" "), settings, !no_stream).await
        }
    }
}

async fn cmd_list(client: &OllamaClient) -> Result<()> {
    let models = client.list_models().await?;
    if models.is_empty() {
        println!("No models installed.");
        return Ok(());
    }
    for entry in models {
        println!(
            "{:3}  {:40} {:>10}  {}",
            entry.index,
            entry.summary.name.bold(),
            format_bytes(entry.summary.size),
            entry.summary.modified_at.dimmed()
        );
    }
    Ok(())
}

async fn cmd_pull(client: &OllamaClient, model: &str) -> Result<()> {
    let mut handle = client.pull_model(model);
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{msg:24} [{bar:40}] {percent:>3}% {prefix}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let mut rx = handle.subscribe();
    while rx.changed().await.is_ok() {
        let progress = rx.borrow_and_update().clone();
        bar.set_position((progress.fraction * 100.0) as u64);
        bar.set_message(progress.status.clone());
        if progress.speed_bps > 0 {
            bar.set_prefix(format!(
                "{} eta {}",
                format_speed(progress.speed_bps),
                format_eta(progress.eta_seconds)
            ));
        }
        if progress.phase.is_terminal() {
            break;
        }
    }

    let final_progress = handle.wait().await;
    bar.finish_and_clear();
    match final_progress.phase {
        PullPhase::Completed => {
            println!("{} pulled {}", "ok:".green().bold(), model.bold());
            Ok(())
        }
        PullPhase::Cancelled => Err(anyhow!("pull of '{}' was cancelled", model)),
        _ => Err(anyhow!(
            "pull of '{}' failed: {}",
            model,
            final_progress.error.unwrap_or_else(|| "unknown error".to_string())
        )),
    }
}

async fn cmd_rm(client: &OllamaClient, model: &str) -> Result<()> {
    client.delete_model(model).await?;
    println!("{} removed {}", "ok:".green().bold(), model.bold());
    Ok(())
}

async fn cmd_show(client: &OllamaClient, model: &str) -> Result<()> {
    let detail = client
        .model_detail(model)
        .await
        .ok_or_else(|| anyhow!("no details available for '{}'", model))?;
    if let Some(parameters) = &detail.parameters {
        println!("{}\n{}", "parameters:".bold(), parameters);
    }
    if let Some(template) = &detail.template {
        println!("{}\n{}", "template:".bold(), template);
    }
    if let Some(capabilities) = &detail.capabilities {
        println!("{} {}", "capabilities:".bold(), capabilities.join(", "));
    }
    if let Some(license) = &detail.license {
        let first_line = license.lines().next().unwrap_or_default();
        println!("{} {}", "license:".bold(), first_line);
    }
    Ok(())
}

async fn cmd_ps(client: &OllamaClient) -> Result<()> {
    let models = client
        .running_models()
        .await
        .ok_or_else(|| anyhow!("could not query running models"))?;
    if models.is_empty() {
        println!("No models loaded.");
        return Ok(());
    }
    for m in models {
        let vram = m.size_vram.map(format_bytes).unwrap_or_else(|| "-".to_string());
        let expires = m
            .expires_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!("{:40} vram {:>10}  expires {}", m.name.bold(), vram, expires);
    }
    Ok(())
}

async fn cmd_version(client: &OllamaClient) -> Result<()> {
    match client.version().await {
        Some(version) => {
            println!("ollama {}", version);
            Ok(())
        }
        None => Err(anyhow!("could not fetch server version")),
    }
}

async fn cmd_check(client: &OllamaClient) -> Result<()> {
    match client.check_connection().await {
        Connectivity::Connected => {
            println!("{} {}", "connected:".green().bold(), client.host());
            Ok(())
        }
        Connectivity::HttpError { status, message } => Err(anyhow!(
            "server answered with HTTP {}: {}",
            status,
            message
        )),
        Connectivity::TlsFailure(msg) => Err(anyhow!(
            "secure connection failed: {}\nCheck the server certificate or use http://",
            msg
        )),
        Connectivity::Unreachable(msg) => Err(anyhow!("server unreachable: {}", msg)),
    }
}

async fn cmd_chat(
    client: &OllamaClient,
    model: &str,
    prompt: String,
    settings: ChatSettings,
    stream: bool,
) -> Result<()> {
    if prompt.trim().is_empty() {
        return Err(anyhow!("empty prompt"));
    }
    let request = ChatRequest::build(
        model,
        vec![ChatMessage::user(prompt)],
        stream,
        &settings,
    );
    let mut chunks = client.chat(request);
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        if let Some(message) = chunk.message {
            if let Some(thinking) = message.thinking {
                eprint!("{}", thinking.dimmed());
            }
            print!("{}", message.content);
        }
        if chunk.done {
            println!();
            if chunk.eval_count > 0 {
                eprintln!(
                    "{}",
                    format!("[{} tokens]", chunk.eval_count).dimmed()
                );
            }
        }
    }
    Ok(())
}
