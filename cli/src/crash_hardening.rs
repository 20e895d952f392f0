//! Keep queued prompts and API keys out of core dumps.

use anyhow::{Context, Result};
use std::env;

const ALLOW_COREDUMPS_ENV: &str = "PROMPTQ_ALLOW_COREDUMPS";

pub fn apply() -> Result<()> {
    if env::var(ALLOW_COREDUMPS_ENV).is_ok_and(|raw| is_truthy(&raw)) {
        tracing::warn!(
            env_var = ALLOW_COREDUMPS_ENV,
            "Core dumps left enabled by environment override"
        );
        return Ok(());
    }

    disable_core_dumps().context("failed to disable core dumps")?;
    tracing::debug!("Core dumps disabled");
    Ok(())
}

fn is_truthy(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

#[cfg(unix)]
fn disable_core_dumps() -> Result<()> {
    use std::io;

    let limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: `limit` is a valid rlimit for the duration of the call.
    if unsafe { libc::setrlimit(libc::RLIMIT_CORE, &raw const limit) } != 0 {
        return Err(io::Error::last_os_error()).context("setrlimit(RLIMIT_CORE=0)");
    }

    #[cfg(target_os = "linux")]
    {
        // SAFETY: PR_SET_DUMPABLE takes a plain integer argument.
        if unsafe { libc::prctl(libc::PR_SET_DUMPABLE, 0, 0, 0, 0) } != 0 {
            return Err(io::Error::last_os_error()).context("prctl(PR_SET_DUMPABLE=0)");
        }
    }

    Ok(())
}

#[cfg(not(unix))]
fn disable_core_dumps() -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::is_truthy;

    #[test]
    fn override_accepts_common_truthy_spellings() {
        for raw in ["1", "true", "TRUE", "yes", " YeS "] {
            assert!(is_truthy(raw), "{raw:?}");
        }
    }

    #[test]
    fn override_rejects_everything_else() {
        for raw in ["", "0", "false", "no", "on"] {
            assert!(!is_truthy(raw), "{raw:?}");
        }
    }
}
