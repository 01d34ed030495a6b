use anyhow::Context;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use lme_core::config::load_yaml_file;
use lme_core::{
    flag_from_env_value, renewal_submission, resolve_scratch_dir, CoreConfig, DocumentService,
    MedicationCatalogue, Prescription, Protocol, SelectionBackend,
};
use lme_scratch::ScratchArea;
use lme_types::SubmissionData;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "lme")]
#[command(about = "LME document assembly CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate the LME document for a submission
    Generate {
        #[command(flatten)]
        inputs: Inputs,
        #[command(flatten)]
        templates: TemplateArgs,
        /// Output file, or a directory to write the suggested filename into
        #[arg(long)]
        output: PathBuf,
    },
    /// Print the templates a submission would be filled into, in order
    Templates {
        #[command(flatten)]
        inputs: Inputs,
        #[command(flatten)]
        templates: TemplateArgs,
    },
    /// List leftover scratch files, optionally removing stale ones
    ScratchCheck {
        /// Scratch directory (default: /dev/shm)
        #[arg(long, env = "LME_SCRATCH_DIR")]
        scratch_dir: Option<PathBuf>,
        /// Remove files older than this many seconds
        #[arg(long)]
        sweep_older_than: Option<u64>,
    },
    /// Build a renewal submission from a previous one and its stored prescription
    Renew {
        /// Previous submission (YAML or JSON)
        #[arg(long)]
        submission: PathBuf,
        /// Stored prescription (YAML or JSON)
        #[arg(long)]
        prescription: PathBuf,
        /// New start date (YYYY-MM-DD)
        #[arg(long)]
        start_date: NaiveDate,
    },
}

#[derive(Args)]
struct Inputs {
    /// Protocol configuration file
    #[arg(long)]
    protocol: PathBuf,
    /// Medication catalogue file
    #[arg(long)]
    medications: PathBuf,
    /// Submission field map (YAML or JSON)
    #[arg(long)]
    submission: PathBuf,
}

#[derive(Args)]
struct TemplateArgs {
    /// Template root, one directory per protocol
    #[arg(long, env = "LME_TEMPLATE_DIR")]
    template_dir: PathBuf,
    /// Base LME template, relative to the template root
    #[arg(long, env = "LME_BASE_TEMPLATE", default_value = "lme_base.pdf")]
    base_template: PathBuf,
    #[arg(long, env = "LME_REPORT_TEMPLATE")]
    report_template: Option<PathBuf>,
    #[arg(long, env = "LME_EXAMS_TEMPLATE")]
    exams_template: Option<PathBuf>,
    #[arg(long, env = "LME_SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,
    #[arg(long, env = "LME_PDFTK_BIN", default_value = "pdftk")]
    pdftk_bin: PathBuf,
    /// "declarative" or "directory-glob"
    #[arg(long, env = "LME_SELECTION_BACKEND", default_value = "declarative")]
    backend: SelectionBackend,
    /// Leave form fields editable
    #[arg(long)]
    no_flatten: bool,
}

impl TemplateArgs {
    fn core_config(self) -> anyhow::Result<CoreConfig> {
        let scratch_dir = resolve_scratch_dir(self.scratch_dir)?;
        let propagate =
            flag_from_env_value(std::env::var("LME_PROPAGATE_FILL_FAILURES").ok(), false)?;

        Ok(
            CoreConfig::new(self.template_dir, self.base_template, scratch_dir)?
                .with_report_template(self.report_template)
                .with_exams_template(self.exams_template)
                .with_pdftk_bin(self.pdftk_bin)
                .with_selection_backend(self.backend)
                .with_flatten(!self.no_flatten)
                .with_propagate_fill_failures(propagate),
        )
    }
}

struct Loaded {
    protocol: Protocol,
    medications: MedicationCatalogue,
    submission: SubmissionData,
}

fn load_inputs(inputs: &Inputs) -> anyhow::Result<Loaded> {
    let loaded = Loaded {
        protocol: Protocol::load(&inputs.protocol)?,
        medications: MedicationCatalogue::load(&inputs.medications)?,
        submission: load_yaml_file(&inputs.submission)?,
    };
    tracing::debug!(
        protocol = %loaded.protocol.name,
        fields = loaded.submission.len(),
        "inputs loaded"
    );
    Ok(loaded)
}

fn output_path(output: &Path, filename: &str) -> PathBuf {
    if output.is_dir() {
        output.join(filename)
    } else {
        output.to_path_buf()
    }
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("lme=warn".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Generate {
            inputs,
            templates,
            output,
        } => {
            let loaded = load_inputs(&inputs)?;
            let service = DocumentService::from_config(&templates.core_config()?)?;
            let document =
                service.generate(&loaded.protocol, &loaded.medications, loaded.submission)?;

            let path = output_path(&output, document.filename());
            std::fs::write(&path, document.bytes())
                .with_context(|| format!("writing {}", path.display()))?;

            println!("{}", path.display());
            println!(
                "{} bytes, sha256 {}",
                document.metadata().size_bytes,
                document.metadata().sha256
            );
        }
        Commands::Templates { inputs, templates } => {
            let loaded = load_inputs(&inputs)?;
            let service = DocumentService::from_config(&templates.core_config()?)?;
            let list =
                service.resolve_templates(&loaded.protocol, &loaded.medications, loaded.submission)?;

            for (i, template) in list.iter().enumerate() {
                println!("{:>2}. {}", i + 1, template.display());
            }
        }
        Commands::ScratchCheck {
            scratch_dir,
            sweep_older_than,
        } => {
            let dir = resolve_scratch_dir(scratch_dir)?;
            let area = ScratchArea::new(&dir)?;

            let leftovers = area.leftovers()?;
            if leftovers.is_empty() {
                println!("No scratch files in {}.", dir.display());
            } else {
                for path in &leftovers {
                    println!("{}", path.display());
                }
            }

            if let Some(secs) = sweep_older_than {
                let removed = area.sweep(Duration::from_secs(secs))?;
                println!("Removed {removed} stale scratch file(s).");
            }
        }
        Commands::Renew {
            submission,
            prescription,
            start_date,
        } => {
            let previous: SubmissionData = load_yaml_file(&submission)?;
            let prescription: Prescription = load_yaml_file(&prescription)?;

            let renewed = renewal_submission(&previous, &prescription, start_date);
            println!("{}", serde_json::to_string_pretty(&renewed)?);
        }
    }

    Ok(())
}
