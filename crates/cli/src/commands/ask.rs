//! `quarry ask` — Run one research query from the terminal.

use clap::Args;
use futures::StreamExt;
use quarry_agent::{ResearchAgent, ResearchEvent};
use quarry_config::AppConfig;
use quarry_core::research::ResearchQuery;
use quarry_core::source::SourceReference;
use std::io::Write;

#[derive(Args, Debug)]
pub struct AskArgs {
    /// The question to research
    pub query: String,

    /// Print the answer as it is produced
    #[arg(long)]
    pub stream: bool,

    /// Show each capability call and its result
    #[arg(long)]
    pub verbose: bool,

    /// Step bound for the research loop
    #[arg(long)]
    pub max_steps: Option<u32>,

    /// Scope the run to a notebook
    #[arg(long)]
    pub notebook: Option<String>,

    /// Scope the run to a channel
    #[arg(long)]
    pub channel: Option<String>,

    /// Allow web search
    #[arg(long)]
    pub web: bool,
}

impl AskArgs {
    pub fn to_query(&self) -> ResearchQuery {
        ResearchQuery {
            query: self.query.clone(),
            channel_id: self.channel.clone(),
            notebook_id: self.notebook.clone(),
            max_steps: self.max_steps,
            verbose: self.verbose,
            search_web: self.web,
            ..ResearchQuery::default()
        }
    }
}

pub async fn run(args: AskArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    QUARRY_API_KEY, OPENAI_API_KEY or OPENROUTER_API_KEY");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let agent = ResearchAgent::from_config(&config);
    let query = args.to_query();

    if args.stream {
        let mut stream = agent.research_stream(query)?;
        let mut stdout = std::io::stdout();

        while let Some(event) = stream.next().await {
            match event {
                ResearchEvent::Status { status } => eprintln!("  {status}..."),
                ResearchEvent::ToolStart { tool, tool_input, .. } => {
                    eprintln!("  → {tool} {tool_input}");
                }
                ResearchEvent::ToolResult { tool, tool_result, .. } => {
                    eprintln!("  ← {tool} {}", preview(&tool_result.to_string(), 160));
                }
                ResearchEvent::Delta { content } => {
                    print!("{content}");
                    stdout.flush()?;
                }
                ResearchEvent::Sources { sources } => {
                    println!();
                    print!("{}", format_sources(&sources));
                }
                ResearchEvent::Done { steps, .. } => {
                    eprintln!("  ({steps} steps)");
                }
                ResearchEvent::Error { error } => {
                    println!();
                    return Err(error.into());
                }
            }
        }
    } else {
        eprint!("  Researching...");
        let response = agent.research(query).await;
        eprint!("\r                \r");
        let response = response.map_err(|e| quarry_agent::user_facing(&e))?;

        println!("{}", response.response);
        if let Some(tool_calls) = &response.tool_calls {
            for call in tool_calls {
                eprintln!("  • {} {}", call.name, preview(&call.result.to_string(), 160));
            }
        }
        if let Some(sources) = &response.sources {
            println!();
            print!("{}", format_sources(sources));
        }
    }

    Ok(())
}

/// Numbered source list; cited sources are starred.
pub fn format_sources(sources: &[SourceReference]) -> String {
    let mut out = String::from("Sources:\n");
    for (i, source) in sources.iter().enumerate() {
        let marker = if source.used_in_response == Some(true) { "*" } else { " " };
        out.push_str(&format!("{marker}[{}] {} ({:.2})", i + 1, source.name, source.score));
        if let Some(location) = &source.location {
            out.push_str(&format!(" @ {}", location.label.as_deref().unwrap_or(&location.value)));
        }
        out.push('\n');
    }
    out
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}…")
}
