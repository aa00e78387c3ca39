//! Запуск системных команд (ip, wg-quick)

use std::ffi::OsStr;
use tokio::process::Command;
use tracing::debug;
use vpnd_core::{Error, Result};

/// Выполнить команду и вернуть stdout
///
/// Ненулевой код возврата превращается в ошибку с текстом stderr.
pub async fn exec<S: AsRef<OsStr>>(program: impl AsRef<OsStr>, args: &[S]) -> Result<String> {
    let program = program.as_ref();
    debug!(
        "Shell exec: {} {}",
        program.to_string_lossy(),
        args.iter()
            .map(|a| a.as_ref().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    );

    let output = Command::new(program).args(args).output().await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Process(format!(
            "{} завершился с ошибкой ({}): {}",
            program.to_string_lossy(),
            output.status,
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
