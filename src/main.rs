use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{ArgGroup, Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use campus_attendance::config::Config;
use campus_attendance::db::{self, PgStore};
use campus_attendance::{
    leave, report, AggregationScope, AttendanceAggregator, AttendanceError, AttendanceStatus,
    LeaveStatus, MarkSheet, Period, RoleAuthorizationGate,
};

#[derive(Parser)]
#[command(name = "campus-attendance")]
#[command(about = "Student attendance tracking and standing reports", long_about = None)]
struct Cli {
    /// Print results as JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Decision {
    Approve,
    Reject,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load sample subjects, attendance and leave
    Seed,
    /// Import attendance rows from a CSV file as one batch
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Mark one session from a student_id,status CSV
    Mark {
        #[arg(long)]
        subject: String,
        #[arg(long)]
        class: String,
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        semester: String,
        #[arg(long)]
        year: String,
        #[arg(long)]
        csv: PathBuf,
    },
    /// Attendance percentage of one student in one subject
    Percentage {
        #[arg(long)]
        student: String,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        semester: String,
        #[arg(long)]
        year: String,
    },
    /// Percentage per calendar month
    #[command(group(
        ArgGroup::new("scope")
            .args(["student", "class", "subject"])
            .multiple(false)
    ))]
    MonthlyTrend {
        #[arg(long)]
        year: String,
        #[arg(long)]
        student: Option<String>,
        #[arg(long)]
        class: Option<String>,
        #[arg(long)]
        subject: Option<String>,
    },
    /// Percentage per semester
    #[command(group(
        ArgGroup::new("scope")
            .args(["student", "class", "subject"])
            .multiple(false)
    ))]
    SemesterTrend {
        #[arg(long)]
        year: String,
        #[arg(long)]
        student: Option<String>,
        #[arg(long)]
        class: Option<String>,
        #[arg(long)]
        subject: Option<String>,
    },
    /// Per-subject percentages for one student
    Summary {
        #[arg(long)]
        student: String,
        #[arg(long)]
        semester: String,
        #[arg(long)]
        year: String,
    },
    /// File a leave application
    ApplyLeave {
        #[arg(long)]
        student: String,
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
        #[arg(long, default_value = "")]
        reason: String,
    },
    /// Approve or reject a pending leave application
    ReviewLeave {
        #[arg(long)]
        id: Uuid,
        #[arg(long, value_enum)]
        decision: Decision,
    },
    /// Generate a markdown class report
    Report {
        #[arg(long)]
        class: String,
        #[arg(long)]
        year: String,
        #[arg(long)]
        threshold: Option<f64>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Check whether a role may reach a path
    Authorize {
        #[arg(long)]
        path: String,
        #[arg(long)]
        role: Option<String>,
    },
}

fn trend_scope(
    year: &str,
    student: Option<&str>,
    class: Option<&str>,
    subject: Option<&str>,
) -> anyhow::Result<AggregationScope> {
    let period = Period::academic_year(year);
    let scope = if student.is_none() && class.is_none() && subject.is_none() {
        AggregationScope::period_only(period)?
    } else {
        AggregationScope::new(student, class, subject, period)?
    };
    Ok(scope)
}

fn read_marks(csv_path: &Path) -> anyhow::Result<HashMap<String, AttendanceStatus>> {
    #[derive(serde::Deserialize)]
    struct MarkRow {
        student_id: String,
        status: String,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut marks = HashMap::new();
    for result in reader.deserialize::<MarkRow>() {
        let row = result?;
        let status: AttendanceStatus = row
            .status
            .parse()
            .with_context(|| format!("bad status for {}", row.student_id))?;
        marks.insert(row.student_id, status);
    }
    Ok(marks)
}

fn print_map(json: bool, values: &BTreeMap<String, f64>) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(values)?);
    } else if values.is_empty() {
        println!("No attendance recorded for this scope.");
    } else {
        for (key, percentage) in values {
            println!("- {key}: {percentage:.1}%");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Authorize { path, role } = &cli.command {
        let gate = RoleAuthorizationGate::new(config.public_prefixes.clone());
        match gate.check(path, role.as_deref()) {
            Ok(()) => println!("Allowed."),
            Err(AttendanceError::AccessDenied { reason, .. }) => {
                println!("Denied ({reason}).");
            }
            Err(err) => return Err(err.into()),
        }
        return Ok(());
    }

    let database_url = config
        .database_url
        .clone()
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;
    info!(max_connections = config.max_connections, "connected to Postgres");

    let store = Arc::new(PgStore::new(pool.clone()));
    let aggregator = AttendanceAggregator::new(store.clone(), store.clone());

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(store.as_ref(), &csv).await?;
            println!("Wrote {inserted} attendance rows from {}.", csv.display());
        }
        Commands::Mark {
            subject,
            class,
            date,
            semester,
            year,
            csv,
        } => {
            let marks = read_marks(&csv)?;
            let sheet = MarkSheet {
                subject_code: subject,
                class_id: class,
                date,
                semester,
                academic_year: year,
            };
            let written = aggregator.bulk_mark(&sheet, &marks).await?;
            println!("Marked {written} students for {} on {}.", sheet.subject_code, sheet.date);
        }
        Commands::Percentage {
            student,
            subject,
            semester,
            year,
        } => {
            let percentage = aggregator
                .calculate_percentage(&student, &subject, &semester, &year)
                .await?;
            if cli.json {
                println!("{}", serde_json::json!({ "percentage": percentage }));
            } else {
                println!("{student} attended {percentage:.1}% of {subject} in {semester} {year}.");
            }
        }
        Commands::MonthlyTrend {
            year,
            student,
            class,
            subject,
        } => {
            let scope = trend_scope(&year, student.as_deref(), class.as_deref(), subject.as_deref())?;
            let points = aggregator.monthly_trend_for(&scope).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&points)?);
            } else if points.is_empty() {
                println!("No attendance recorded for this scope.");
            } else {
                for point in points.iter() {
                    println!("- {}: {:.1}%", point.bucket, point.percentage);
                }
            }
        }
        Commands::SemesterTrend {
            year,
            student,
            class,
            subject,
        } => {
            let scope = trend_scope(&year, student.as_deref(), class.as_deref(), subject.as_deref())?;
            let trend = aggregator.semester_trend_for(&scope).await?;
            print_map(cli.json, &trend)?;
        }
        Commands::Summary {
            student,
            semester,
            year,
        } => {
            let summary = aggregator
                .summary_by_subject(&student, &semester, &year)
                .await?;
            print_map(cli.json, &summary)?;
        }
        Commands::ApplyLeave {
            student,
            from,
            to,
            reason,
        } => {
            let application = leave::apply_leave(store.as_ref(), &student, from, to, &reason).await?;
            println!("Leave application {} filed (Pending).", application.id);
        }
        Commands::ReviewLeave { id, decision } => {
            let status = match decision {
                Decision::Approve => LeaveStatus::Approved,
                Decision::Reject => LeaveStatus::Rejected,
            };
            let reviewed = leave::review_leave(store.as_ref(), id, status).await?;
            println!("Leave application {} is now {}.", reviewed.id, reviewed.status);
        }
        Commands::Report {
            class,
            year,
            threshold,
            out,
        } => {
            let threshold = threshold.unwrap_or(config.standing_threshold);
            let gathered = report::gather_class_report(&aggregator, &class, &year, threshold).await?;
            std::fs::write(&out, report::build_report(&gathered))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Authorize { .. } => unreachable!("handled before connecting"),
    }

    Ok(())
}
