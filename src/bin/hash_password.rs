// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Print an Argon2id hash for a password, peppered with `PASSWORD_PEPPER`.
//!
//! ```text
//! PASSWORD_PEPPER=... hash-password 'correct horse'
//! echo 'correct horse' | PASSWORD_PEPPER=... hash-password
//! ```

use std::io::{self, BufRead};
use std::process::ExitCode;

use estate_guard::auth::password::PasswordVerifier;
use estate_guard::config::PASSWORD_PEPPER_ENV;

fn main() -> ExitCode {
    let Some(pepper) = std::env::var(PASSWORD_PEPPER_ENV).ok().filter(|p| !p.is_empty()) else {
        eprintln!("{PASSWORD_PEPPER_ENV} must be set");
        return ExitCode::FAILURE;
    };

    let password = match std::env::args().nth(1) {
        Some(arg) => arg,
        None => {
            let mut line = String::new();
            if let Err(e) = io::stdin().lock().read_line(&mut line) {
                eprintln!("failed to read password from stdin: {e}");
                return ExitCode::FAILURE;
            }
            line.trim_end_matches(['\r', '\n']).to_string()
        }
    };
    if password.is_empty() {
        eprintln!("usage: hash-password <password>  (or pipe it on stdin)");
        return ExitCode::FAILURE;
    }

    let hash = PasswordVerifier::new(&pepper).and_then(|verifier| verifier.hash(&password));
    match hash {
        Ok(hash) => {
            println!("{hash}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("failed to hash password: {e}");
            ExitCode::FAILURE
        }
    }
}
