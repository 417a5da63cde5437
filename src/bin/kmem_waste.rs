// Copyright (c) SimpleStaking, Viable Systems and Tezedge Contributors
// SPDX-License-Identifier: MIT

use std::{
    fs::File,
    io::{self, BufReader, Write},
};
use anyhow::{bail, Context};
use structopt::StructOpt;
use kmem_waste::{
    configuration::{InputFormat, Opts, OutputFormat, Settings},
    Ingest, Resolver, SymbolTable,
};

fn symbols(settings: &Settings) -> anyhow::Result<Option<SymbolTable>> {
    match SymbolTable::load(&settings.kallsyms) {
        Ok(table) => {
            if table.is_empty() {
                log::warn!("no usable symbols in {}, call sites will be addresses", settings.kallsyms.display());
            }
            Ok(Some(table))
        },
        Err(error) if error.is_not_found() && !settings.kallsyms_explicit => {
            log::warn!("{}, call sites will be addresses", error);
            Ok(None)
        },
        Err(error) => Err(error.into()),
    }
}

fn main() -> anyhow::Result<()> {
    let opts = Opts::from_args();

    tracing_subscriber::fmt()
        .with_max_level(opts.log_level())
        .with_writer(io::stderr)
        .init();

    let settings = Settings::load(&opts)?;
    let mut ingest = Ingest::new(Resolver::new(symbols(&settings)?));

    let file = File::open(&settings.input)
        .with_context(|| format!("cannot open trace {}", settings.input.display()))?;
    let reader = BufReader::new(file);
    match settings.input_format {
        InputFormat::Text => ingest.run_text(reader),
        InputFormat::Raw => {
            let types = settings.event_types().context("cannot read event ids")?;
            if types.is_empty() {
                bail!("raw input needs event ids, pass --tracefs or set [event_ids] in the config");
            }
            log::debug!("{} event ids known", types.len());
            ingest.run_binary(reader, &types)
        },
    }
    .with_context(|| format!("cannot process trace {}", settings.input.display()))?;

    let report = ingest.finish();
    let stdout = io::stdout();
    let mut stdout = stdout.lock();
    match settings.output {
        OutputFormat::Table => write!(stdout, "{}", report)?,
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut stdout, &report)?;
            writeln!(stdout)?;
        },
    }
    Ok(())
}
