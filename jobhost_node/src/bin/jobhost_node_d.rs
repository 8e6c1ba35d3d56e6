// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-FileCopyrightText: © 2023 Siemens AG
// SPDX-License-Identifier: MIT
use clap::Parser;

#[derive(Debug, clap::Parser)]
#[command(long_about = None)]
struct Args {
    #[arg(short, long, default_value_t = String::from("node.toml"))]
    config_file: String,
    #[arg(short, long, default_value_t = String::from(""))]
    template: String,
    /// Index the functions, print the result and exit.
    #[arg(long, default_value_t = false)]
    index_only: bool,
}

fn read_conf_from_file(filename: &str) -> anyhow::Result<jobhost_node::JobHostSettings> {
    Ok(toml::from_str::<jobhost_node::JobHostSettings>(&std::fs::read_to_string(filename)?)?)
}

async fn index_only(settings: jobhost_node::JobHostSettings, functions: jobhost_node::function_registry::FunctionRegistry) -> anyhow::Result<()> {
    let mut functions = functions;
    if !settings.manifest.is_empty() {
        functions.add_manifest(jobhost_api::function_descriptor::FunctionManifest::from_file(&settings.manifest)?);
    }
    let stores = jobhost_node::stores::HostStores::from_settings(&settings.storage, settings.polling.blob_page_size)?;
    let host = jobhost_node::host::JobHost::new(settings, stores, functions);
    let results = host.index().await?;
    for definition in results.new_functions.iter().chain(results.updated_functions.iter()) {
        println!("indexed: {}", definition.location);
    }
    for definition in &results.deleted_functions {
        println!("deleted: {}", definition.location);
    }
    for error in &results.errors {
        println!("error: {}", error);
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();

    // Create a template host configuration and exit.
    if !args.template.is_empty() {
        jobhost_node::create_template(&args.template, jobhost_node::jobhost_node_default_conf().as_str())?;
        return Ok(());
    }

    // Read the configuration file.
    let conf = read_conf_from_file(&args.config_file)?;

    let mut functions = jobhost_node::function_registry::FunctionRegistry::new();
    jobhost_node::builtins::register_builtins(&mut functions);

    let async_runtime = tokio::runtime::Builder::new_multi_thread().worker_threads(8).enable_all().build()?;
    match args.index_only {
        true => async_runtime.block_on(index_only(conf, functions)),
        false => async_runtime.block_on(jobhost_node::jobhost_node_main(conf, functions)),
    }
}
