//! stonesense - analyze kidney scans and write JSON, annotated image and PDF reports

use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use stonesense::advice::{advisor_from_settings, AdviceRequest};
use stonesense::patients::{
    register_patient, DoctorContact, NewPatient, Patient, PatientRepository,
    SqlitePatientRepository,
};
use stonesense::pipeline::Analysis;
use stonesense::storage::ArtifactStore;
use stonesense::{Detector, DetectorRegistry, ImageInput, Pipeline, ReportConfig, ReportDocument};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// UI mode for stderr progress.
    #[arg(long, value_enum, default_value = "auto", global = true)]
    ui: ui::UiMode,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze one scan image.
    Analyze {
        image: PathBuf,
        #[command(flatten)]
        run: RunArgs,
        /// Patient whose scan count is updated after a successful analysis.
        #[arg(long)]
        patient_id: Option<String>,
        #[arg(long, env = "STONESENSE_PATIENT_DB", default_value = "stonesense-patients.db")]
        patient_db: String,
        /// Print the JSON report to stdout.
        #[arg(long)]
        print: bool,
    },
    /// Analyze several scan images in parallel.
    Batch {
        images: Vec<PathBuf>,
        #[command(flatten)]
        run: RunArgs,
        /// Worker threads (defaults to the configured count).
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Ask a question about the findings in a JSON report.
    Advise {
        /// report.json written by `analyze`.
        #[arg(long)]
        report: PathBuf,
        #[arg(long)]
        question: String,
    },
    /// Manage patient records.
    Patient {
        #[arg(long, env = "STONESENSE_PATIENT_DB", default_value = "stonesense-patients.db")]
        db: String,
        #[command(subcommand)]
        action: PatientAction,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Directory that receives the artifacts.
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Detector backend (synthetic, replay, tract).
    #[arg(long)]
    detector: Option<String>,
    /// Detections JSON for the replay backend.
    #[arg(long)]
    replay: Option<PathBuf>,
    /// Skip the PDF report.
    #[arg(long)]
    no_pdf: bool,
}

#[derive(Subcommand, Debug)]
enum PatientAction {
    /// Register a new patient.
    Add {
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long)]
        email: String,
        /// YYYY-MM-DD
        #[arg(long)]
        date_of_birth: Option<String>,
        #[arg(long)]
        gender: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        address: Option<String>,
        #[arg(long)]
        allergies: Option<String>,
        #[arg(long)]
        medications: Option<String>,
        #[arg(long)]
        history: Option<String>,
        #[arg(long)]
        previous_kidney_stones: bool,
    },
    /// Show a patient by id or email.
    Show { key: String },
    /// Search by name, email or id.
    Search { term: String },
    /// Save or replace a patient's doctor contact.
    Doctor {
        patient_id: String,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let ui = ui::Ui::new(cli.ui, std::io::stderr().is_terminal());

    match cli.command {
        Command::Analyze {
            image,
            run,
            patient_id,
            patient_db,
            print,
        } => analyze(&ui, image, run, patient_id, &patient_db, print),
        Command::Batch {
            images,
            run,
            workers,
        } => batch(&ui, images, run, workers),
        Command::Advise { report, question } => advise(&ui, report, question),
        Command::Patient { db, action } => patient(db, action),
    }
}

fn load_config(run: &RunArgs) -> Result<ReportConfig> {
    let mut cfg = ReportConfig::load()?;
    if let Some(dir) = &run.output_dir {
        cfg.output_dir = dir.clone();
    }
    if let Some(path) = &run.replay {
        cfg.detector.replay_path = Some(path.clone());
        if run.detector.is_none() {
            cfg.detector.backend = "replay".to_string();
        }
    }
    if let Some(backend) = &run.detector {
        cfg.detector.backend = backend.to_lowercase();
    }
    if run.no_pdf {
        cfg.render.pdf = false;
    }
    Ok(cfg)
}

fn build_pipeline(ui: &ui::Ui, cfg: &ReportConfig) -> Result<Pipeline> {
    let _stage = ui.stage("Load detector");
    let registry = DetectorRegistry::from_settings(&cfg.detector)?;
    let detector: Arc<dyn Detector> = registry
        .default_detector()
        .ok_or_else(|| anyhow!("no detector backend registered"))?;
    detector
        .warm_up()
        .map_err(|e| anyhow!("detector {} failed to warm up: {}", detector.name(), e))?;
    log::info!(
        "detector backend {} (available: {})",
        detector.name(),
        registry.list().join(", ")
    );
    Ok(Pipeline::from_config(cfg, detector))
}

fn print_summary(analysis: &Analysis) {
    let report = &analysis.report;
    let summary = &report.summary;
    println!(
        "{}: {} stone(s), total burden {:.2} mm, largest {:.2} mm, severity {}",
        report.metadata.filename.as_deref().unwrap_or("<upload>"),
        summary.total_stones,
        summary.total_burden_mm,
        summary.largest_stone_mm,
        summary.severity
    );
    if analysis.source.is_fallback() {
        println!("  note: detector unavailable, synthetic detections were used");
    }
    for warning in &analysis.warnings {
        println!("  dropped: {}", warning);
    }
    for rec in &report.recommendations {
        println!("  - {}", rec);
    }
}

fn analyze(
    ui: &ui::Ui,
    image: PathBuf,
    run: RunArgs,
    patient_id: Option<String>,
    patient_db: &str,
    print: bool,
) -> Result<()> {
    let cfg = load_config(&run)?;
    let pipeline = build_pipeline(ui, &cfg)?;
    let input = ImageInput::from_path(&image)?;
    let analysis = {
        let _stage = ui.stage("Analyze image");
        pipeline.process(&input)?
    };
    let artifacts = {
        let _stage = ui.stage("Write artifacts");
        ArtifactStore::open(&cfg.output_dir)?.persist(&analysis, pipeline.render_settings())?
    };

    if print {
        println!("{}", analysis.report.to_json_pretty()?);
    } else {
        print_summary(&analysis);
    }
    println!("report written to {}", artifacts.json.display());
    if let Some(pdf) = &artifacts.pdf {
        println!("pdf written to {}", pdf.display());
    }
    if let Some(err) = &artifacts.image_error {
        eprintln!("annotated image unavailable: {}", err);
    }
    if let Some(err) = &artifacts.pdf_error {
        eprintln!("pdf report unavailable: {}", err);
    }

    if let Some(id) = patient_id {
        let mut repo = SqlitePatientRepository::open(patient_db)?;
        let patient = repo.record_scan(&id, analysis.report.analysis_timestamp)?;
        println!(
            "recorded scan {} for {} ({})",
            patient.total_scans,
            patient.full_name(),
            patient.patient_id
        );
    }
    Ok(())
}

fn batch(ui: &ui::Ui, images: Vec<PathBuf>, run: RunArgs, workers: Option<usize>) -> Result<()> {
    if images.is_empty() {
        return Err(anyhow!("no images given"));
    }
    let cfg = load_config(&run)?;
    let pipeline = build_pipeline(ui, &cfg)?;
    let store = ArtifactStore::open(&cfg.output_dir)?;

    let mut inputs = Vec::with_capacity(images.len());
    let mut failed = 0usize;
    for path in &images {
        match ImageInput::from_path(path) {
            Ok(input) => inputs.push(input),
            Err(e) => {
                failed += 1;
                log::warn!("skipping {}: {}", path.display(), e);
            }
        }
    }

    let results = {
        let mut progress = ui.batch(inputs.len());
        pipeline.process_batch_with(&inputs, workers.unwrap_or(cfg.workers), |index, result| {
            let label = inputs[index].filename.as_deref().unwrap_or("<upload>");
            progress.finish_one(label, result.is_ok());
        })
    };

    for (input, result) in inputs.iter().zip(results) {
        let name = input.filename.as_deref().unwrap_or("<upload>");
        match result {
            Ok(analysis) => {
                let artifacts = store.persist(&analysis, pipeline.render_settings())?;
                print_summary(&analysis);
                println!("  report: {}", artifacts.json.display());
                for err in [&artifacts.image_error, &artifacts.pdf_error].into_iter().flatten() {
                    eprintln!("  {}: {}", name, err);
                }
            }
            Err(e) => {
                failed += 1;
                eprintln!("{}: {}", name, e);
            }
        }
    }
    println!(
        "{} of {} image(s) analyzed",
        images.len() - failed,
        images.len()
    );
    if failed > 0 {
        return Err(anyhow!("{} image(s) failed", failed));
    }
    Ok(())
}

fn advise(ui: &ui::Ui, report: PathBuf, question: String) -> Result<()> {
    let cfg = ReportConfig::load()?;
    let raw = std::fs::read_to_string(&report)
        .with_context(|| format!("failed to read report {}", report.display()))?;
    let doc = ReportDocument::from_json(&raw)
        .map_err(|e| anyhow!("invalid report {}: {}", report.display(), e))?;
    let advisor = advisor_from_settings(&cfg.advisor)?;
    let answer = {
        let _stage = ui.stage("Ask advisor");
        advisor.advise(&AdviceRequest::from_document(&doc, question))?
    };
    println!("{}", answer);
    Ok(())
}

fn print_patient(p: &Patient) {
    println!("{}  {}  <{}>", p.patient_id, p.full_name(), p.email);
    if let Some(dob) = p.date_of_birth {
        let age = p.age().map(|a| a.to_string()).unwrap_or_else(|| "?".into());
        println!("  born {} (age {})", dob, age);
    }
    println!(
        "  registered {}, scans {}, last scan {}",
        p.registration_date.format("%Y-%m-%d"),
        p.total_scans,
        p.last_scan_date
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".into())
    );
}

fn print_doctor(d: &DoctorContact) {
    println!(
        "  doctor: phone {}, email {} (updated {})",
        d.phone.as_deref().unwrap_or("-"),
        d.email.as_deref().unwrap_or("-"),
        d.updated
    );
}

fn patient(db: String, action: PatientAction) -> Result<()> {
    let mut repo = SqlitePatientRepository::open(&db)?;
    match action {
        PatientAction::Add {
            first_name,
            last_name,
            email,
            date_of_birth,
            gender,
            phone,
            address,
            allergies,
            medications,
            history,
            previous_kidney_stones,
        } => {
            let date_of_birth = date_of_birth
                .map(|raw| {
                    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                        .map_err(|e| anyhow!("date of birth must be YYYY-MM-DD: {}", e))
                })
                .transpose()?;
            let form = NewPatient {
                first_name,
                last_name,
                email,
                date_of_birth,
                gender,
                phone,
                address,
                allergies,
                current_medications: medications,
                medical_history: history,
                previous_kidney_stones,
                ..Default::default()
            };
            let patient = register_patient(&mut repo, form, Utc::now())?;
            print_patient(&patient);
        }
        PatientAction::Show { key } => {
            let found = if key.contains('@') {
                repo.find_by_email(&key)?
            } else {
                repo.find_by_id(&key.to_uppercase())?
            };
            let patient = found.ok_or_else(|| anyhow!("no patient matches {}", key))?;
            print_patient(&patient);
            if let Some(doctor) = repo.doctor_contact(&patient.patient_id)? {
                print_doctor(&doctor);
            }
        }
        PatientAction::Doctor {
            patient_id,
            phone,
            email,
        } => {
            let patient_id = patient_id.to_uppercase();
            let contact = DoctorContact::new(phone, email, Utc::now().date_naive());
            repo.save_doctor_contact(&patient_id, &contact)?;
            println!("doctor contact saved for {}", patient_id);
            print_doctor(&contact);
        }
        PatientAction::Search { term } => {
            let found = repo.search(&term)?;
            if found.is_empty() {
                println!("no patients match {}", term);
            }
            for p in &found {
                print_patient(p);
            }
        }
    }
    Ok(())
}
