// SPDX-License-Identifier: MIT

use agentflow_rs::config::Settings;
use agentflow_rs::engine::{Node, Store};
use agentflow_rs::flow::{Agent, MapReduce, MultiAgent, Rag, Workflow};
use agentflow_rs::model::{self, prompt_node, GenerationConfig, Model};
use anyhow::{bail, Context as _};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use serde_json::{json, Value};
use std::io::{self, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Settings file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Primary model, overrides the settings file
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Secondary model used for aggregation and review steps
    #[arg(long, global = true)]
    secondary_model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send one prompt through a retrying agent
    Ask {
        #[arg(short, long)]
        prompt: String,
    },
    /// Run several prompts concurrently
    Parallel {
        #[arg(short, long = "prompt", required = true)]
        prompts: Vec<String>,
    },
    /// Research, code, then review a topic
    Workflow {
        #[arg(short, long)]
        topic: String,
    },
    /// Research, summarize and critique a topic into a JSON report
    Structured {
        #[arg(short, long)]
        topic: String,
    },
    /// Summarize every document, then aggregate the summaries
    MapReduce {
        #[arg(short, long = "doc", required = true)]
        docs: Vec<String>,
    },
    /// Produce TypeScript, HTML and Tailwind artifacts concurrently
    MultiAgent {
        #[arg(short, long)]
        subject: String,
    },
    /// Retrieve context for a query, then answer it
    Rag {
        #[arg(short, long)]
        query: String,
    },
    /// Draft a text and loop on human approval
    Review {
        #[arg(short, long)]
        topic: String,
    },
}

fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    let settings = Settings::load(args.config.as_deref())?;

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder
        .enable_all()
        .max_blocking_threads(settings.runtime.max_blocking_threads);
    if let Some(workers) = settings.runtime.worker_threads {
        builder.worker_threads(workers);
    }
    let runtime = builder.build().context("Failed to start the runtime")?;

    runtime.block_on(run(args, settings))
}

/// Models and settings shared by every command
struct Context {
    settings: Settings,
    primary: String,
    secondary: String,
    cancel: CancellationToken,
}

impl Context {
    fn primary(&self) -> anyhow::Result<Arc<dyn Model>> {
        Ok(model::connect(&self.primary)?)
    }

    fn secondary(&self) -> anyhow::Result<Arc<dyn Model>> {
        Ok(model::connect(&self.secondary)?)
    }

    fn generation(&self) -> GenerationConfig {
        self.settings.generation.clone()
    }

    fn agent(&self, node: Node) -> Agent {
        Agent::with_policy(node, self.settings.retry.clone()).with_cancellation(self.cancel.clone())
    }
}

async fn run(args: Args, settings: Settings) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received, stopping after the current node");
            on_signal.cancel();
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });

    let ctx = Context {
        primary: args.model.unwrap_or_else(|| settings.models.primary.clone()),
        secondary: args
            .secondary_model
            .unwrap_or_else(|| settings.models.secondary.clone()),
        settings,
        cancel,
    };

    match args.command {
        Commands::Ask { prompt } => ask(&ctx, prompt).await,
        Commands::Parallel { prompts } => parallel(&ctx, prompts).await,
        Commands::Workflow { topic } => code_workflow(&ctx, topic).await,
        Commands::Structured { topic } => structured(&ctx, topic).await,
        Commands::MapReduce { docs } => map_reduce(&ctx, docs).await,
        Commands::MultiAgent { subject } => multi_agent(&ctx, subject).await,
        Commands::Rag { query } => rag(&ctx, query).await,
        Commands::Review { topic } => review(&ctx, topic).await,
    }
}

fn store_with(key: &str, value: impl Into<Value>) -> Store {
    let mut store = Store::new();
    store.insert(key, value);
    store
}

async fn ask(ctx: &Context, prompt: String) -> anyhow::Result<()> {
    let node = prompt_node(ctx.primary()?, "{prompt}", "response", ctx.generation());
    let agent = ctx.agent(node);

    println!("Sending prompt: {}", prompt);
    let out = agent.decide(store_with("prompt", prompt)).await?;
    println!("Response: {}", out.get_str("response").unwrap_or_default());
    Ok(())
}

async fn parallel(ctx: &Context, prompts: Vec<String>) -> anyhow::Result<()> {
    let node = prompt_node(ctx.primary()?, "{prompt}", "response", ctx.generation());
    let agent = ctx.agent(node);

    let runs = prompts
        .iter()
        .map(|prompt| agent.decide(store_with("prompt", prompt.as_str())));
    let outputs = futures::future::try_join_all(runs).await?;

    for (prompt, out) in prompts.iter().zip(outputs) {
        println!("Prompt: {}", prompt);
        println!("Response: {}\n", out.get_str("response").unwrap_or_default());
    }
    Ok(())
}

async fn code_workflow(ctx: &Context, topic: String) -> anyhow::Result<()> {
    let primary = ctx.primary()?;
    let config = ctx.generation();

    let mut workflow = Workflow::new()
        .named("research-code-review")
        .with_cancellation(ctx.cancel.clone());
    workflow.add_step(
        "research",
        prompt_node(
            primary.clone(),
            "Research the topic '{topic}' and list the key facts a developer needs.",
            "research",
            config.clone(),
        ),
    )?;
    workflow.add_step(
        "code",
        prompt_node(
            primary,
            "Based on this research, write a short, idiomatic code example:\n{research}",
            "code",
            config.clone(),
        ),
    )?;
    workflow.add_step(
        "review",
        prompt_node(
            ctx.secondary()?,
            "Review this code and suggest concrete improvements:\n{code}",
            "review",
            config,
        ),
    )?;
    workflow.connect("research", "code")?;
    workflow.connect("code", "review")?;

    let out = workflow.run(store_with("topic", topic)).await?;
    for key in ["research", "code", "review"] {
        println!("=== {} ===\n{}\n", key, out.get_str(key).unwrap_or_default());
    }
    Ok(())
}

async fn structured(ctx: &Context, topic: String) -> anyhow::Result<()> {
    let primary = ctx.primary()?;
    let config = ctx.generation();

    let structure = Node::blocking(|mut store: Store| {
        let report = json!({
            "topic": store.get("topic").cloned().unwrap_or(Value::Null),
            "summary": store.get("summary").cloned().unwrap_or(Value::Null),
            "critique": store.get("critique").cloned().unwrap_or(Value::Null),
            "sources": store.get("research").cloned().unwrap_or(Value::Null),
        });
        store.insert("report", report);
        Ok(store)
    })
    .named("structure");

    let mut workflow = Workflow::new()
        .named("structured-report")
        .with_cancellation(ctx.cancel.clone());
    workflow.add_step(
        "research",
        prompt_node(
            primary.clone(),
            "Collect the most important facts about {topic}.",
            "research",
            config.clone(),
        ),
    )?;
    workflow.add_step(
        "summary",
        prompt_node(
            primary.clone(),
            "Summarize these facts in three sentences:\n{research}",
            "summary",
            config.clone(),
        ),
    )?;
    workflow.add_step(
        "critique",
        prompt_node(
            primary,
            "Point out gaps or weak claims in this summary:\n{summary}",
            "critique",
            config,
        ),
    )?;
    workflow.add_step("structure", structure)?;
    workflow.connect("research", "summary")?;
    workflow.connect("summary", "critique")?;
    workflow.connect("critique", "structure")?;

    let out = workflow.run(store_with("topic", topic)).await?;
    let report = out.get("report").cloned().unwrap_or(Value::Null);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn map_reduce(ctx: &Context, docs: Vec<String>) -> anyhow::Result<()> {
    let map = prompt_node(
        ctx.primary()?,
        "Summarize this document in one sentence:\n{doc}",
        "summary",
        ctx.generation(),
    );

    let aggregator = ctx.secondary()?;
    let config = ctx.generation();
    let reduce = Node::<Vec<Store>>::from_fn(move |mapped: Vec<Store>| {
        let model = Arc::clone(&aggregator);
        let config = config.clone();
        async move {
            let summaries: Vec<Value> = mapped
                .iter()
                .map(|store| store.get("summary").cloned().unwrap_or(Value::Null))
                .collect();
            let listing = mapped
                .iter()
                .enumerate()
                .map(|(i, store)| {
                    format!("{}. {}", i + 1, store.get_str("summary").unwrap_or_default())
                })
                .collect::<Vec<_>>()
                .join("\n");
            let prompt = format!("Combine these summaries into one overview:\n{}", listing);
            let overview = model.generate(&prompt, &config).await?;

            let mut out = Store::new();
            out.insert("summaries", summaries);
            out.insert("overview", overview);
            Ok(out)
        }
    })
    .named("aggregate");

    let stores = docs.into_iter().map(|doc| store_with("doc", doc)).collect();
    let out = MapReduce::new(map, reduce)
        .with_cancellation(ctx.cancel.clone())
        .call(stores)
        .await?;

    if let Some(Value::Array(summaries)) = out.get("summaries") {
        for (i, summary) in summaries.iter().enumerate() {
            println!("{}. {}", i + 1, summary.as_str().unwrap_or_default());
        }
    }
    println!("\nOverview: {}", out.get_str("overview").unwrap_or_default());
    Ok(())
}

async fn multi_agent(ctx: &Context, subject: String) -> anyhow::Result<()> {
    let primary = ctx.primary()?;
    let config = ctx.generation();
    let artifacts = [
        (
            "typescript",
            "Write the TypeScript game logic for {subject}. Return only code.",
        ),
        (
            "html",
            "Write the HTML page hosting a canvas for {subject}. Return only markup.",
        ),
        (
            "tailwindcss",
            "Write Tailwind CSS classes styling {subject}. Return only CSS.",
        ),
    ];

    let nodes = artifacts
        .iter()
        .map(|(key, template)| prompt_node(primary.clone(), *template, *key, config.clone()))
        .collect();
    let out = MultiAgent::new(nodes)
        .with_cancellation(ctx.cancel.clone())
        .call(store_with("subject", subject))
        .await?;

    for (key, _) in artifacts {
        println!("=== {} ===\n{}\n", key, out.get_str(key).unwrap_or_default());
    }
    Ok(())
}

async fn rag(ctx: &Context, query: String) -> anyhow::Result<()> {
    let config = ctx.generation();
    let retrieve = prompt_node(
        ctx.primary()?,
        "Provide background context useful for answering: {query}",
        "context",
        config.clone(),
    );
    let generate = prompt_node(
        ctx.secondary()?,
        "Using this context:\n{context}\n\nAnswer the question: {query}",
        "response",
        config,
    );

    let out = Rag::new(retrieve, generate)
        .with_cancellation(ctx.cancel.clone())
        .call(store_with("query", query))
        .await?;
    println!("Context: {}\n", out.get_str("context").unwrap_or_default());
    println!("Response: {}", out.get_str("response").unwrap_or_default());
    Ok(())
}

/// Reviewer's answer to a draft
#[derive(Debug, Clone, PartialEq, Eq)]
enum Decision {
    Approve,
    Deny,
    Cancel,
    Revise(String),
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        match word.to_ascii_lowercase().as_str() {
            "approve" | "a" | "y" => Ok(Self::Approve),
            "deny" | "d" | "n" => Ok(Self::Deny),
            "cancel" | "c" => Ok(Self::Cancel),
            "revise" | "r" if !rest.trim().is_empty() => {
                Ok(Self::Revise(rest.trim().to_string()))
            }
            "revise" | "r" => {
                Err("revise needs feedback, e.g. 'revise make it shorter'".to_string())
            }
            other => Err(format!("unrecognized decision '{}'", other)),
        }
    }
}

/// Blocking node asking the operator about the current draft
fn human_review() -> Node {
    Node::blocking(|mut store: Store| {
        println!(
            "\n--- Draft ---\n{}\n",
            store.get_str("draft").unwrap_or_default()
        );
        print!("approve / deny / cancel / revise <feedback>: ");
        io::stdout().flush()?;

        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            return Err("stdin closed".into());
        }
        let decision = Decision::from_str(&line)?;
        log::debug!("Reviewer answered {:?}", decision);

        let (word, feedback) = match decision {
            Decision::Approve => ("approve", None),
            Decision::Deny => ("deny", None),
            Decision::Cancel => ("cancel", None),
            Decision::Revise(feedback) => ("revise", Some(feedback)),
        };
        store.insert("decision", word);
        match feedback {
            Some(feedback) => store.insert("feedback", feedback),
            None => store.remove("feedback"),
        };
        Ok(store)
    })
    .named("human-review")
}

async fn review(ctx: &Context, topic: String) -> anyhow::Result<()> {
    let draft = prompt_node(
        ctx.primary()?,
        "Write a short paragraph about {topic}.{revision}",
        "draft",
        ctx.generation(),
    );
    // Unrecognized answers are asked again
    let reviewer = Agent::new(human_review())
        .max_attempts(3)
        .with_cancellation(ctx.cancel.clone());

    let mut workflow = Workflow::new()
        .named("human-in-the-loop")
        .with_cancellation(ctx.cancel.clone());
    workflow.add_step("draft", ctx.agent(draft).into_node())?;
    workflow.add_step("review", reviewer.into_node())?;
    workflow.connect("draft", "review")?;

    let mut store = store_with("topic", topic);
    loop {
        store = workflow.run(store).await?;
        let decision = store.get_str("decision").map(str::to_string);
        match decision.as_deref() {
            Some("approve") => {
                println!("\nApproved:\n{}", store.get_str("draft").unwrap_or_default());
                return Ok(());
            }
            Some("deny") => {
                println!("Draft denied, nothing published.");
                return Ok(());
            }
            Some("cancel") => {
                println!("Review cancelled.");
                return Ok(());
            }
            Some("revise") => {
                let feedback = store.get_str("feedback").unwrap_or_default();
                log::info!("Revising draft: {}", feedback);
                let revision = format!(
                    " Revise this previous draft:\n{}\nFeedback: {}",
                    store.get_str("draft").unwrap_or_default(),
                    feedback
                );
                store.insert("revision", revision);
            }
            other => bail!("Unexpected review decision: {:?}", other),
        }
    }
}
