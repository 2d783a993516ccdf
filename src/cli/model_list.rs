//! Model listing and interactive model selection
//!
//! Both read the locally installed models from the Ollama server.

use std::error::Error;

use crate::api::models::{fetch_models, sort_models};
use crate::api::ModelInfo;

async fn installed_models(
    client: &reqwest::Client,
    base_url: &str,
) -> Result<Vec<ModelInfo>, Box<dyn Error>> {
    let mut models = fetch_models(client, base_url).await?.models;
    sort_models(&mut models);
    Ok(models)
}

pub async fn list_models(client: &reqwest::Client, base_url: &str) -> Result<(), Box<dyn Error>> {
    println!("🤖 Available Models at {base_url}");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();

    let models = installed_models(client, base_url).await?;
    if models.is_empty() {
        println!("No models installed. Pull one with `ollama pull <model>`.");
        return Ok(());
    }

    println!("Found {} models (sorted newest first):", models.len());
    println!();
    for model in &models {
        println!("  • {}", describe(model));
    }
    Ok(())
}

/// Prompts on stdin for one of the installed models.
pub async fn pick_model(client: &reqwest::Client, base_url: &str) -> Result<String, Box<dyn Error>> {
    let models = installed_models(client, base_url).await?;
    if models.is_empty() {
        return Err(
            format!("No models found at {base_url}. Pull one or pass --model.").into(),
        );
    }

    println!("Select a model:");
    for (i, model) in models.iter().enumerate() {
        println!("  {}. {}", i + 1, describe(model));
    }

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    let choice = parse_choice(&input, models.len()).ok_or("Invalid choice")?;
    Ok(models[choice].name.clone())
}

/// 1-based menu choice to a 0-based index.
pub(crate) fn parse_choice(input: &str, len: usize) -> Option<usize> {
    let choice: usize = input.trim().parse().ok()?;
    (1..=len).contains(&choice).then(|| choice - 1)
}

fn describe(model: &ModelInfo) -> String {
    let mut line = model.name.clone();
    if let Some(size) = model.size {
        line.push_str(&format!(" ({})", format_size(size)));
    }
    if let Some(modified) = model.modified_at.as_deref() {
        // Keep the date part of the RFC 3339 timestamp.
        let date = modified.split('T').next().unwrap_or(modified);
        line.push_str(&format!(" - modified {date}"));
    }
    line
}

fn format_size(bytes: u64) -> String {
    const GB: f64 = 1_000_000_000.0;
    const MB: f64 = 1_000_000.0;
    let bytes = bytes as f64;
    if bytes >= GB {
        format!("{:.1} GB", bytes / GB)
    } else {
        format!("{:.0} MB", bytes / MB)
    }
}
