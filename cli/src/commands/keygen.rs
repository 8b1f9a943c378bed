// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `agentgate keygen`: print a fresh master key.

use anyhow::Result;
use colored::Colorize;

use agentgate_core::infrastructure::MasterKey;

pub fn execute() -> Result<()> {
    let key = MasterKey::generate();
    println!("{}", key.to_base64());
    eprintln!(
        "{}",
        "Store this in AGENTGATE_ENCRYPTION_KEY (or the variable named by spec.encryption.key_env). Losing it makes every stored secret unreadable."
            .yellow()
    );
    Ok(())
}
