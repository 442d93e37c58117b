//! CLI smoke and outline entry point.
//!
//! # Responsibility
//! - Print the linked `arbor_core` version.
//! - Given a database path, print every project (or one, by id) as an
//!   indented outline.
//!
//! Usage: `arbor_cli [DB_PATH [PROJECT_ID]]`. Set `ARBOR_LOG_DIR` to an
//! absolute path to enable file logging.

use arbor_core::{open_db, ProjectLeases, SqliteNodeRepository, TreeService};
use log::info;
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use uuid::Uuid;

fn main() -> ExitCode {
    println!("arbor_core version={}", arbor_core::core_version());

    if let Ok(log_dir) = std::env::var("ARBOR_LOG_DIR") {
        if let Err(err) = arbor_core::init_logging(arbor_core::default_log_level(), &log_dir) {
            eprintln!("logging disabled: {err}");
        }
    }

    let mut args = std::env::args().skip(1);
    let Some(db_path) = args.next() else {
        return ExitCode::SUCCESS;
    };
    let project_filter = match args.next().map(|raw| Uuid::parse_str(&raw)).transpose() {
        Ok(filter) => filter,
        Err(err) => {
            eprintln!("invalid project id: {err}");
            return ExitCode::from(2);
        }
    };

    match print_outline(PathBuf::from(db_path), project_filter) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn print_outline(db_path: PathBuf, project_filter: Option<Uuid>) -> Result<(), Box<dyn Error>> {
    let conn = open_db(&db_path)?;
    let tree = TreeService::new(
        SqliteNodeRepository::try_new(&conn)?,
        Arc::new(ProjectLeases::new()),
    );

    let projects = tree
        .list_projects()?
        .into_iter()
        .filter(|project| project_filter.map_or(true, |id| id == project.id));
    let mut printed = 0usize;
    for project in projects {
        for node in tree.get_subtree(project.id)? {
            let node = node?;
            let indent = "  ".repeat(node.node_type.level());
            let template = if node.is_template { " [template]" } else { "" };
            println!(
                "{indent}- {} {} ({}){template}",
                node.node_type, node.title, node.id
            );
            printed += 1;
        }
    }
    info!("event=cli_outline module=cli status=ok nodes={printed}");
    Ok(())
}
