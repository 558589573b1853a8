use clap::{Parser, Subcommand};
use easy_edge::chat::{ChatSession, Interrupt};
use easy_edge::config::{self, Config, SettingsPatch};
use easy_edge::error::{EdgeError, Result};
use easy_edge::inference::{self, LoadParams};
use easy_edge::models::{format_bytes, ModelManager, ModelSource};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const PULL_EXAMPLES: &str = "\
Example:
  easy-edge pull --url https://huggingface.co/google/gemma-3-1b-it-qat-q4_0-gguf/resolve/main/gemma-3-1b-it-q4_0.gguf
  easy-edge pull --repo-id TheBloke/Llama-2-7B-Chat-GGUF --filename llama-2-7b-chat.Q4_K_M.gguf";

#[derive(Parser)]
#[command(name = "easy-edge", version)]
#[command(about = "Run LLMs locally like Ollama", long_about = None)]
struct Cli {
    /// Directory to store models
    #[arg(long, global = true, env = "EASY_EDGE_MODELS_DIR")]
    models_dir: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a model (model name is derived from the repository)
    Pull {
        /// Hugging Face URL of the model file
        #[arg(long, conflicts_with_all = ["repo_id", "filename"])]
        url: Option<String>,
        /// Hugging Face repository ID
        #[arg(long)]
        repo_id: Option<String>,
        /// Filename in the repository
        #[arg(long)]
        filename: Option<String>,
        /// Branch, tag, or commit for --repo-id
        #[arg(long, requires = "repo_id")]
        revision: Option<String>,
    },
    /// List installed models
    List,
    /// Run a model
    Run {
        /// Model to run; the default model when omitted
        name: Option<String>,
        /// Prompt to send to the model
        #[arg(short, long)]
        prompt: Option<String>,
        /// Start interactive chat mode
        #[arg(short, long)]
        interactive: bool,
    },
    /// Remove a model
    Remove { name: String },
    /// Set the default model for `run`
    #[command(name = "default")]
    SetDefault { name: String },
    /// Show or change generation settings
    Settings {
        #[arg(long)]
        max_tokens: Option<u32>,
        #[arg(long)]
        temperature: Option<f32>,
        #[arg(long)]
        top_p: Option<f32>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::debug!("Command failed: {e:?}");
            eprintln!("❌ {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let fallback = if verbose { "easy_edge=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = Config::load()?;
    let models_dir =
        config::resolve_models_dir(cli.models_dir.as_deref().or(config.models_dir.as_deref()))?;
    let mut manager = ModelManager::new(&config, models_dir)?;

    match cli.command {
        Commands::Pull {
            url,
            repo_id,
            filename,
            revision,
        } => {
            let source = match (url, repo_id, filename) {
                (Some(url), _, _) => ModelSource::Url(url),
                (None, Some(repo_id), Some(filename)) => ModelSource::Repo {
                    repo_id,
                    filename,
                    revision,
                },
                _ => {
                    eprintln!("❌ Please provide either --url or both --repo-id and --filename");
                    eprintln!("\n{PULL_EXAMPLES}");
                    return Ok(ExitCode::from(2));
                }
            };
            pull(&mut manager, &source).await?;
        }
        Commands::List => list(&manager),
        Commands::Run {
            name,
            prompt,
            interactive,
        } => run_model(&manager, &config, name, prompt, interactive).await?,
        Commands::Remove { name } => {
            let removed = manager.remove(&name)?;
            if removed.file_deleted {
                println!("✅ Removed model file: {}", removed.path.display());
            }
            println!("✅ Removed model '{name}' from configuration");
        }
        Commands::SetDefault { name } => {
            manager.set_default(&name)?;
            println!("✅ Default model set to '{name}'");
        }
        Commands::Settings {
            max_tokens,
            temperature,
            top_p,
        } => {
            let patch = SettingsPatch {
                max_tokens,
                temperature,
                top_p,
            };
            let settings = if patch.is_empty() {
                manager.settings()
            } else {
                manager.update_settings(&patch)?
            };
            println!("max_tokens:  {}", settings.max_tokens);
            println!("temperature: {}", settings.temperature);
            println!("top_p:       {}", settings.top_p);
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn pull(manager: &mut ModelManager, source: &ModelSource) -> Result<()> {
    let outcome = tokio::select! {
        result = manager.pull(source) => result?,
        _ = tokio::signal::ctrl_c() => {
            return Err(EdgeError::Other("Download interrupted".to_string()));
        }
    };

    if outcome.already_present {
        println!(
            "Model {} already exists at {}",
            outcome.name,
            outcome.path.display()
        );
    } else {
        println!(
            "✅ Model {} downloaded successfully! ({})",
            outcome.name,
            format_bytes(outcome.size_bytes)
        );
    }
    Ok(())
}

fn list(manager: &ModelManager) {
    let mut models = manager.list().peekable();
    if models.peek().is_none() {
        println!("No models installed. Use 'easy-edge pull --url <url>' to download a model.");
        return;
    }

    println!("\nInstalled Models:");
    for model in models {
        let status = if model.present { "✅" } else { "❌" };
        let default = if model.is_default { " (default)" } else { "" };
        println!(
            "  {status} {} ({}){default}",
            model.name,
            format_bytes(model.size_bytes)
        );
    }
}

async fn run_model(
    manager: &ModelManager,
    config: &Config,
    name: Option<String>,
    prompt: Option<String>,
    interactive: bool,
) -> Result<()> {
    let name = name
        .or_else(|| manager.default_model().map(str::to_string))
        .ok_or_else(|| {
            EdgeError::Other(
                "No model given and no default model set. Use: easy-edge default <name>"
                    .to_string(),
            )
        })?;
    let path = manager.resolve_path(&name)?;

    let settings = manager.settings();
    let stop = config.runtime.stop.clone();
    let params = LoadParams {
        context_size: config.runtime.context_size,
        threads: config.runtime.thread_count(),
    };

    let interrupt = Interrupt::new();
    let listener = Arc::clone(&interrupt);
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if !listener.trigger() {
                eprintln!("\nGoodbye!");
                std::process::exit(130);
            }
        }
    });

    tokio::task::spawn_blocking(move || -> Result<()> {
        let runtime = inference::default_runtime()?;
        println!("Loading model {name}...");
        let mut model = runtime.load(&path, &params)?;
        let mut session = ChatSession::new(model.as_mut(), settings, stop, interrupt);

        if interactive {
            return session.run(&name, io::stdin().lock(), io::stdout());
        }

        let prompt = match prompt {
            Some(prompt) => prompt,
            None => read_prompt()?,
        };
        let reply = session.respond(&prompt)?;

        println!("\n── Response ──");
        println!("{}", reply.text);
        if reply.interrupted {
            println!("[interrupted]");
        }
        Ok(())
    })
    .await
    .map_err(|e| EdgeError::Other(format!("Inference task failed: {e}")))?
}

fn read_prompt() -> Result<String> {
    print!("Enter your prompt: ");
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let prompt = line.trim();
    if prompt.is_empty() {
        return Err(EdgeError::Other("Empty prompt".to_string()));
    }
    Ok(prompt.to_string())
}
