//! `inspect memory` subcommands over the persistent stores.

use std::io::Write;

use anyhow::Result;
use serde_json::json;
use webpilot_agent::{AgentConfig, MemoryConfig, MemoryManager, SiteMemoryStore};
use webpilot_storage::StoreSet;

use crate::MemoryAction;

fn open(config: &AgentConfig) -> Result<(StoreSet, MemoryManager, SiteMemoryStore)> {
    let stores = StoreSet::open(&config.memory_dir)?;
    let manager = MemoryManager::open(&stores, MemoryConfig::default())?;
    let site = SiteMemoryStore::new(stores.site_memory.clone())?;
    Ok((stores, manager, site))
}

pub fn inspect_memory(config: &AgentConfig, action: MemoryAction) -> Result<()> {
    match action {
        MemoryAction::List => list(config),
        MemoryAction::Clear { yes } => clear(config, yes),
        MemoryAction::Export { output } => export(config, output),
    }
}

fn list(config: &AgentConfig) -> Result<()> {
    let (stores, manager, site) = open(config)?;
    println!("memory dir: {}", stores.dir.display());
    println!(
        "episodes: {}  patterns: {}  skills: {}  site memories: {}",
        manager.episodic().len(),
        manager.semantic().len(),
        manager.skills().len(),
        site.len(),
    );

    let recent = manager.episodic().recent(10);
    if !recent.is_empty() {
        println!("\nrecent episodes:");
        for episode in recent.iter().rev() {
            println!(
                "  {}  {:<9}  {:>5}ms  {}",
                episode.id,
                outcome_label(&episode.outcome),
                episode.duration_ms,
                episode.goal_text,
            );
        }
    }

    let skills = manager.skills().all();
    if !skills.is_empty() {
        println!("\nskills:");
        for skill in &skills {
            println!(
                "  {}  {:>3} runs  {:>3.0}%  {}",
                skill.id,
                skill.exec_count,
                skill.success_rate() * 100.0,
                skill.name,
            );
        }
    }
    Ok(())
}

fn outcome_label(outcome: &webpilot_agent::EpisodeOutcome) -> String {
    match outcome {
        webpilot_agent::EpisodeOutcome::Success => "success".into(),
        webpilot_agent::EpisodeOutcome::Failed { error } => format!("failed({error})"),
        webpilot_agent::EpisodeOutcome::Timeout => "timeout".into(),
        webpilot_agent::EpisodeOutcome::Cancelled => "cancelled".into(),
        webpilot_agent::EpisodeOutcome::Escalated => "escalated".into(),
    }
}

fn clear(config: &AgentConfig, yes: bool) -> Result<()> {
    if !yes {
        eprint!("clear all memory stores under {}? [y/N] ", config.memory_dir.display());
        std::io::stderr().flush()?;
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        if !matches!(line.trim().to_lowercase().as_str(), "y" | "yes") {
            println!("aborted");
            return Ok(());
        }
    }
    let (_stores, manager, site) = open(config)?;
    let episodes = manager.episodic().clear()?;
    let semantic = manager.semantic().clear()?;
    let skills = manager.skills().clear()?;
    let sites = site.clear()?;
    println!("cleared {episodes} episodes, {semantic} patterns, {skills} skills, {sites} site memories");
    Ok(())
}

fn export(config: &AgentConfig, output: Option<std::path::PathBuf>) -> Result<()> {
    let (_stores, manager, site) = open(config)?;
    let dump = json!({
        "episodes": manager.episodic().all(),
        "semantic": manager.semantic().all(),
        "skills": manager.skills().all(),
        "site_memory": site.all(),
    });
    let rendered = serde_json::to_string_pretty(&dump)?;
    match output {
        Some(path) => {
            std::fs::write(&path, rendered)?;
            println!("exported to {}", path.display());
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use webpilot_agent::{Episode, EpisodeOutcome};

    #[test]
    fn export_includes_saved_episodes() {
        let dir = tempdir().unwrap();
        let config = AgentConfig::default().with_memory_dir(dir.path().join("memory"));
        {
            let (_stores, manager, _site) = open(&config).unwrap();
            manager
                .episodic()
                .save(&Episode::new("exported goal", EpisodeOutcome::Success))
                .unwrap();
        }

        let out = dir.path().join("dump.json");
        export(&config, Some(out.clone())).unwrap();
        let text = std::fs::read_to_string(out).unwrap();
        assert!(text.contains("exported goal"));
    }

    #[test]
    fn clear_with_yes_empties_stores() {
        let dir = tempdir().unwrap();
        let config = AgentConfig::default().with_memory_dir(dir.path().join("memory"));
        {
            let (_stores, manager, _site) = open(&config).unwrap();
            manager
                .episodic()
                .save(&Episode::new("to be cleared", EpisodeOutcome::Success))
                .unwrap();
        }
        clear(&config, true).unwrap();
        let (_stores, manager, _site) = open(&config).unwrap();
        assert!(manager.episodic().is_empty());
    }
}
