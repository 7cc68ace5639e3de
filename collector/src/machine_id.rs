// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use anyhow::{Context, Result};

/// Host name of this machine, used as the default client id.
#[cfg(unix)]
pub fn get_machine_name() -> Result<String> {
    let name = nix::unistd::gethostname().context("unable to get host name")?;
    name.into_string()
        .map_err(|name| anyhow::format_err!("host name is not valid UTF-8: {:?}", name))
}

#[cfg(windows)]
pub fn get_machine_name() -> Result<String> {
    std::env::var("COMPUTERNAME").context("unable to get host name from COMPUTERNAME")
}
