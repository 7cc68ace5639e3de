// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#[macro_use]
extern crate anyhow;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use collector::{read_testcase, Collector, CollectorConfig, TestCase};
use crash_info::{CrashInfo, ProgramConfiguration};
use log::{error, info};

#[derive(Debug, Parser)]
#[command(name = "fuzzmanager-collector", version, about = "Crash submission and signature cache client")]
struct Opt {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Command,
}

/// Values that override `~/.fuzzmanagerconf`.
#[derive(Debug, Args)]
struct Settings {
    #[arg(long, global = true)]
    sigdir: Option<PathBuf>,

    #[arg(long, global = true)]
    serverhost: Option<String>,

    #[arg(long, global = true)]
    serverport: Option<u16>,

    #[arg(long, global = true)]
    serverproto: Option<String>,

    #[arg(long, global = true)]
    serverauthtoken: Option<String>,

    #[arg(long, global = true)]
    clientid: Option<String>,

    #[arg(long, global = true)]
    tool: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Submit a crash to the server.
    Submit(SubmitOpt),
    /// Download the server's signatures into the signature cache.
    Refresh,
    /// Replace the signature cache with the contents of a local archive.
    RefreshFromZip { zip: PathBuf },
}

#[derive(Debug, Args)]
struct SubmitOpt {
    #[arg(long)]
    stdout: Option<PathBuf>,

    #[arg(long)]
    stderr: Option<PathBuf>,

    /// Separately captured crash output, e.g. an ASan log.
    #[arg(long)]
    crashdata: Option<PathBuf>,

    /// Binary with a `<binary>.fuzzmanagerconf` describing the target.
    #[arg(long, conflicts_with_all = ["product", "platform", "os", "product_version"])]
    binary: Option<PathBuf>,

    #[arg(long, requires_all = ["platform", "os"])]
    product: Option<String>,

    #[arg(long)]
    platform: Option<String>,

    #[arg(long)]
    os: Option<String>,

    #[arg(long)]
    product_version: Option<String>,

    #[arg(long, value_parser = parse_key_value)]
    metadata: Vec<(String, String)>,

    #[arg(long, value_parser = parse_key_value)]
    env: Vec<(String, String)>,

    #[arg(long, num_args = 1.., allow_hyphen_values = true)]
    args: Vec<String>,

    #[arg(long)]
    testcase: Option<PathBuf>,

    #[arg(long, default_value_t = 0)]
    testcase_quality: i64,
}

fn parse_key_value(value: &str) -> Result<(String, String)> {
    let (key, value) = value
        .split_once('=')
        .ok_or_else(|| format_err!("expected KEY=VALUE, got: {}", value))?;
    Ok((key.to_string(), value.to_string()))
}

impl From<Settings> for CollectorConfig {
    fn from(settings: Settings) -> Self {
        CollectorConfig {
            sig_cache_dir: settings.sigdir,
            server_host: settings.serverhost,
            server_port: settings.serverport,
            server_protocol: settings.serverproto,
            server_auth_token: settings.serverauthtoken.map(Into::into),
            client_id: settings.clientid,
            tool: settings.tool,
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let opt = Opt::parse();
    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(run(opt));

    if let Err(err) = &result {
        error!("error running collector: {:?}", err);
    }

    result
}

async fn run(opt: Opt) -> Result<()> {
    let collector = Collector::from_global_config(opt.settings.into())?;

    match opt.command {
        Command::Submit(submit) => run_submit(&collector, submit).await,
        Command::Refresh => collector.refresh().await,
        Command::RefreshFromZip { zip } => collector.refresh_from_zip(zip),
    }
}

async fn read_optional(path: Option<&Path>) -> Result<Option<String>> {
    match path {
        Some(path) => {
            let data = tokio::fs::read(path)
                .await
                .with_context(|| format!("unable to read {}", path.display()))?;
            Ok(Some(String::from_utf8_lossy(&data).into_owned()))
        }
        None => Ok(None),
    }
}

fn program_configuration(opt: &SubmitOpt) -> Result<ProgramConfiguration> {
    let mut configuration = if let Some(binary) = &opt.binary {
        ProgramConfiguration::from_binary(binary)?.ok_or_else(|| {
            format_err!(
                "binary configuration not found: {}.fuzzmanagerconf",
                binary.display()
            )
        })?
    } else {
        match (&opt.product, &opt.platform, &opt.os) {
            (Some(product), Some(platform), Some(os)) => ProgramConfiguration::new(
                product,
                platform,
                os,
                opt.product_version.clone(),
                None,
                None,
                None,
            ),
            _ => bail!("either --binary or --product, --platform and --os are required"),
        }
    };

    configuration.add_environment_variables(opt.env.iter().cloned());
    configuration.add_program_arguments(opt.args.iter().cloned());

    Ok(configuration)
}

/// Builds the crash from the captured output and reads the test case once,
/// attaching it to the crash when it is text.
async fn prepare_crash(opt: &SubmitOpt) -> Result<(CrashInfo, Option<TestCase>)> {
    let configuration = program_configuration(opt)?;

    let stdout = read_optional(opt.stdout.as_deref()).await?;
    let stderr = read_optional(opt.stderr.as_deref()).await?;
    let crashdata = read_optional(opt.crashdata.as_deref()).await?;

    let mut crash_info = CrashInfo::from_raw_crash_data(
        stdout.as_deref(),
        stderr.as_deref(),
        configuration,
        crashdata.as_deref(),
    )?;

    let testcase = match &opt.testcase {
        Some(path) => {
            let testcase = read_testcase(path).await?;
            testcase.attach(&mut crash_info);
            Some(testcase)
        }
        None => None,
    };

    Ok((crash_info, testcase))
}

async fn run_submit(collector: &Collector, opt: SubmitOpt) -> Result<()> {
    let (crash_info, testcase) = prepare_crash(&opt).await?;
    let metadata: BTreeMap<String, String> = opt.metadata.into_iter().collect();

    collector
        .submit(
            &crash_info,
            testcase.as_ref(),
            opt.testcase_quality,
            Some(&metadata),
        )
        .await?;

    info!("crash submitted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_consistent() {
        Opt::command().debug_assert();
    }

    #[test]
    fn key_value_pairs() -> Result<()> {
        assert_eq!(
            parse_key_value("ASAN_OPTIONS=detect_leaks=0")?,
            ("ASAN_OPTIONS".to_string(), "detect_leaks=0".to_string())
        );
        assert!(parse_key_value("novalue").is_err());
        Ok(())
    }

    #[test]
    fn submit_arguments() -> Result<()> {
        let opt = Opt::try_parse_from([
            "fuzzmanager-collector",
            "--tool",
            "jsfunfuzz",
            "submit",
            "--product",
            "mozilla-central",
            "--platform",
            "x86-64",
            "--os",
            "linux",
            "--env",
            "A=1",
            "--testcase-quality",
            "3",
            "--args",
            "--fuzzing-safe",
            "-e",
        ])?;

        assert_eq!(opt.settings.tool.as_deref(), Some("jsfunfuzz"));
        let Command::Submit(submit) = opt.command else {
            bail!("expected submit command");
        };
        assert_eq!(submit.testcase_quality, 3);

        let configuration = program_configuration(&submit)?;
        assert_eq!(configuration.product, "mozilla-central");
        assert_eq!(configuration.env.get("A").map(String::as_str), Some("1"));
        assert_eq!(configuration.args, vec!["--fuzzing-safe", "-e"]);
        Ok(())
    }

    #[tokio::test]
    async fn text_testcase_is_attached_once_read() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let stderr = dir.path().join("stderr.txt");
        std::fs::write(&stderr, "Assertion failure: false, at /src/a.cpp:1\n")?;
        let text = dir.path().join("test.js");
        std::fs::write(&text, "crash();\n")?;
        let binary = dir.path().join("test.bin");
        std::fs::write(&binary, [0u8, 1, 2])?;

        let parse = |testcase: &Path| -> Result<SubmitOpt> {
            let opt = Opt::try_parse_from([
                "fuzzmanager-collector".to_string(),
                "submit".to_string(),
                "--product".to_string(),
                "mozilla-central".to_string(),
                "--platform".to_string(),
                "x86-64".to_string(),
                "--os".to_string(),
                "linux".to_string(),
                "--stderr".to_string(),
                stderr.display().to_string(),
                "--testcase".to_string(),
                testcase.display().to_string(),
            ])?;
            match opt.command {
                Command::Submit(submit) => Ok(submit),
                _ => bail!("expected submit command"),
            }
        };

        let (crash_info, testcase) = prepare_crash(&parse(&text)?).await?;
        assert_eq!(crash_info.testcase.as_deref(), Some("crash();\n"));
        assert_eq!(crash_info.raw_stderr.len(), 1);
        assert!(testcase.map_or(false, |t| !t.is_binary));

        let (crash_info, testcase) = prepare_crash(&parse(&binary)?).await?;
        assert_eq!(crash_info.testcase, None);
        assert!(testcase.map_or(false, |t| t.is_binary));
        Ok(())
    }
}
