use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scendata::compose;
use scendata::{Authority, EditContext, Scenario};

#[derive(Parser)]
#[command(name = "scentool")]
#[command(about = "Scenario file toolkit: combine, split, validate", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge a master file and its section files into one document
    Combine {
        /// Master file containing include directives
        master: PathBuf,
        /// Where to write the combined document
        output: PathBuf,
    },
    /// Split a combined document back into master and section files
    Split {
        /// Combined document produced by `combine`
        combined: PathBuf,
        /// Where to write the restored master; section files land next
        /// to it under their recorded hrefs
        master_out: PathBuf,
    },
    /// Parse and validate a combined scenario document
    Validate {
        file: PathBuf,
        /// Tolerate broken references instead of failing on them
        #[arg(long)]
        editor: bool,
    },
    /// Count occurrences of an identifier across a scenario
    CountRefs { file: PathBuf, id: String },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Combine { master, output } => {
            compose::combine_sections(&master, &output)
                .with_context(|| format!("combining {}", master.display()))?;
        }
        Commands::Split {
            combined,
            master_out,
        } => {
            compose::split_sections(&combined, &master_out)
                .with_context(|| format!("splitting {}", combined.display()))?;
        }
        Commands::Validate { file, editor } => {
            let mut scenario =
                Scenario::read(&file).with_context(|| format!("reading {}", file.display()))?;
            let authority = if editor {
                Authority::Editor
            } else {
                Authority::Runtime
            };
            scenario
                .validate(authority)
                .with_context(|| format!("validating {}", file.display()))?;
            log::info!(
                "validated '{}' under {:?} authority",
                scenario.master().name(),
                authority
            );
            println!("{} is valid under {:?} authority", file.display(), authority);
        }
        Commands::CountRefs { file, id } => {
            let mut scenario =
                Scenario::read(&file).with_context(|| format!("reading {}", file.display()))?;
            let edit = EditContext::new();
            let id = scenario.intern(&id);
            let count = scenario.count_references(&id, &edit);
            log::info!("counted {count} reference(s) to '{id}' in {}", file.display());
            println!("{count} reference(s) to '{id}'");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_combine_then_validate_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("master.xml"),
            concat!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n",
                "<scenario>\n",
                "  <info name=\"Skirmish\"><grid width=\"8\" height=\"8\"/></info>\n",
                "  <include element=\"factions\" href=\"factions.xml\"/>\n",
                "</scenario>\n",
            ),
        )
        .unwrap();
        fs::write(
            dir.path().join("factions.xml"),
            "<factions>\n  <faction id=\"Empire\" name=\"The Empire\"/>\n</factions>\n",
        )
        .unwrap();

        let combined = dir.path().join("combined.xml");
        compose::combine_sections(&dir.path().join("master.xml"), &combined).unwrap();

        let mut scenario = Scenario::read(&combined).unwrap();
        scenario.validate(Authority::Runtime).unwrap();
        assert!(scenario.factions().get("Empire").is_some());
    }
}
