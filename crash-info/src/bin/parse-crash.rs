// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use anyhow::Result;
use crash_info::{CrashInfo, ProgramConfiguration};
use std::{env, fs};

fn main() -> Result<()> {
    for filename in env::args().skip(1) {
        let data = fs::read_to_string(&filename)?;
        let configuration = ProgramConfiguration::default();
        let crash = CrashInfo::from_raw_crash_data(None, None, configuration, Some(&data))?;
        eprintln!("{}", filename);
        println!("{}", serde_json::to_string_pretty(&crash)?);
        if let Some(assertion) = crash.assertion() {
            println!("{}", serde_json::to_string_pretty(&assertion)?);
        }
    }

    Ok(())
}
