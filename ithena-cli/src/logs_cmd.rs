//! `ithena-cli logs` subcommands.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use ithena_core::auth::KeyringTokenProvider;
use ithena_core::store::{remove_database, LocalStore};

use crate::webui::{self, WebUiState};

/// `logs show`: open the local store and serve the log viewer.
pub async fn show(port: u16, version: &str) -> i32 {
    let store = match tokio::task::spawn_blocking(LocalStore::open_default).await {
        Ok(Ok(store)) => store,
        Ok(Err(e)) => {
            eprintln!("Error initializing local database for 'logs show': {e}");
            return 1;
        }
        Err(e) => {
            eprintln!("Error initializing local database for 'logs show': {e}");
            return 1;
        }
    };

    println!("Attempting to start local log viewer UI. Access it at http://localhost:{port}");
    println!("Local logs are being read from: {}", store.path().display());
    println!("Press Ctrl+C to stop the server.");

    let state = Arc::new(WebUiState {
        store: Arc::new(store),
        provider: Arc::new(KeyringTokenProvider::new()),
        version: version.to_string(),
    });

    match webui::serve(state, port).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Log viewer failed: {e}");
            1
        }
    }
}

/// `logs clear`: interactive confirmation, then delete the database file.
pub async fn clear() -> i32 {
    let path = match LocalStore::default_path() {
        Ok(path) => path,
        Err(e) => {
            eprintln!("Error determining local log store path: {e}");
            return 1;
        }
    };

    println!("This will delete all locally stored logs at: {}", path.display());
    print!("Are you sure you want to continue? [y/N]: ");
    use std::io::Write;
    let _ = std::io::stdout().flush();

    let mut answer = String::new();
    let mut reader = BufReader::new(tokio::io::stdin());
    if reader.read_line(&mut answer).await.is_err() {
        println!("Operation cancelled.");
        return 0;
    }

    let answer = answer.trim().to_lowercase();
    if answer != "y" && answer != "yes" {
        println!("Operation cancelled.");
        return 0;
    }

    match remove_database(&path) {
        Ok(true) => {
            println!("Successfully deleted local logs file: {}", path.display());
            0
        }
        Ok(false) => {
            println!("No local logs file found to delete.");
            0
        }
        Err(e) => {
            eprintln!("Error deleting local logs file: {e}");
            1
        }
    }
}
