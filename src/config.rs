//! Manual CLI-flag parsing and credential resolution.
//!
//! No argument-parsing crate: flags are matched by hand the same way this
//! codebase's other long-running daemon entrypoint does it.

use std::path::Path;

use serde::Deserialize;

use crate::errors::ArbiterError;

#[derive(Debug, Clone)]
pub struct Config {
    pub seed_host: String,
    pub seed_port: u16,
    pub mysql_user: String,
    pub mysql_password: String,
    pub http_port: u16,
    pub debug: bool,
}

#[derive(Debug, Deserialize)]
struct AuthFile {
    user: String,
    password: String,
}

impl Config {
    /// Parses `args` (excluding argv[0]) into a `Config`, loading the auth
    /// file if `--mysql-auth-file` was given and no inline password was.
    pub fn parse(args: &[String]) -> Result<Config, ArbiterError> {
        let mut seed_host = None;
        let mut seed_port: u16 = 3306;
        let mut mysql_user = "root".to_string();
        let mut mysql_password = String::new();
        let mut mysql_auth_file: Option<String> = None;
        let mut http_port: u16 = 8099;
        let mut debug = false;

        let mut i = 0;
        while i < args.len() {
            let arg = args[i].as_str();
            let mut next = || {
                i += 1;
                args.get(i).cloned().ok_or_else(|| {
                    ArbiterError::PermanentConfig(format!("{arg} requires a value"))
                })
            };
            match arg {
                "--seed-host" => seed_host = Some(next()?),
                "--seed-port" => seed_port = parse_port(&next()?)?,
                "--mysql-user" => mysql_user = next()?,
                "--mysql-password" => mysql_password = next()?,
                "--mysql-auth-file" => mysql_auth_file = Some(next()?),
                "--http-port" => http_port = parse_port(&next()?)?,
                "--debug" => debug = true,
                other => {
                    return Err(ArbiterError::PermanentConfig(format!(
                        "unrecognized flag '{other}'"
                    )));
                }
            }
            i += 1;
        }

        let seed_host = seed_host
            .ok_or_else(|| ArbiterError::PermanentConfig("--seed-host is required".to_string()))?;

        if mysql_password.is_empty() {
            if let Some(path) = mysql_auth_file {
                let auth = load_auth_file(&path)?;
                mysql_user = auth.user;
                mysql_password = auth.password;
            }
        }

        Ok(Config {
            seed_host,
            seed_port,
            mysql_user,
            mysql_password,
            http_port,
            debug,
        })
    }
}

fn parse_port(s: &str) -> Result<u16, ArbiterError> {
    s.parse()
        .map_err(|_| ArbiterError::PermanentConfig(format!("'{s}' is not a valid port")))
}

fn load_auth_file(path: impl AsRef<Path>) -> Result<AuthFile, ArbiterError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|e| {
        ArbiterError::PermanentConfig(format!("reading {}: {e}", path.display()))
    })?;
    let auth: AuthFile = serde_json::from_str(&raw)
        .map_err(|e| ArbiterError::PermanentConfig(format!("parsing {}: {e}", path.display())))?;

    if auth.user.is_empty() || auth.password.is_empty() {
        return Err(ArbiterError::PermanentConfig(format!(
            "{}: 'user' and 'password' must both be non-empty",
            path.display()
        )));
    }
    Ok(auth)
}
