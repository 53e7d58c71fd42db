// SPDX-FileCopyrightText: © 2024 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT
use clap::Parser;
use dynfn_node::supervisor::ExecMode;

#[derive(Debug, clap::Subcommand)]
enum Commands {
    /// Names of all registered functions.
    List {},
    Inspect {
        name: String,
        /// Also show the source and whether it is compiled.
        #[arg(long, default_value_t = false)]
        full: bool,
    },
    Register {
        name: String,
        #[arg(long, default_value_t = String::from(""))]
        description: String,
        /// JSON array of {name, type, description}.
        #[arg(long, default_value_t = String::from("[]"))]
        parameters: String,
        /// instructions or code.
        #[arg(long, default_value_t = String::from("instructions"))]
        kind: String,
        #[arg(long, conflicts_with = "body_file")]
        body: Option<String>,
        #[arg(long)]
        body_file: Option<String>,
        #[arg(long, default_value_t = String::from(""))]
        output_instructions: String,
    },
    Update {
        name: String,
        field: String,
        value: String,
    },
    Compile {
        name: String,
    },
    Delete {
        name: String,
    },
    /// Run a function in this process.
    Call {
        name: String,
        #[arg(default_value_t = String::from("{}"))]
        arguments: String,
    },
    /// Run a function in a child process.
    CallProcess {
        name: String,
        #[arg(default_value_t = String::from("{}"))]
        arguments: String,
    },
    /// Shared output log, or the latest output of one function.
    ReadOutput {
        #[arg(default_value_t = String::from(""))]
        func: String,
    },
    Catalog {},
}

#[derive(Debug, clap::Parser)]
#[command(long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,
    #[arg(short, long, default_value_t = String::from("dynfn.toml"))]
    config_file: String,
    #[arg(short, long, default_value_t = String::from(""))]
    template: String,
    /// Run NAME with the JSON arguments ARGS, print the result and exit.
    #[arg(long = "exec", num_args = 1..=2, value_names = ["NAME", "ARGS"], conflicts_with = "exec_out")]
    exec: Option<Vec<String>>,
    /// As --exec, also appending the result to the shared output log.
    #[arg(long = "exec_out", num_args = 1..=2, value_names = ["NAME", "ARGS"])]
    exec_out: Option<Vec<String>>,
}

async fn run_single(node: dynfn_node::DynFnNode, mode: ExecMode, exec: Vec<String>) -> std::process::ExitCode {
    let name = exec.first().cloned().unwrap_or_default();
    let arguments = exec.get(1).cloned().unwrap_or_else(|| String::from("{}"));
    log::debug!("{} {} {}", mode.flag(), name, arguments);

    let res = match mode {
        ExecMode::Exec => node.exec(&name, &arguments).await,
        ExecMode::ExecOut => node.exec_and_persist(&name, &arguments).await,
    };
    match res {
        Ok(result) => {
            print!("{}", result);
            std::process::ExitCode::SUCCESS
        }
        Err(err) => {
            eprint!("{}", err);
            std::process::ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<std::process::ExitCode> {
    env_logger::init();

    let args = Args::parse();
    if !args.template.is_empty() {
        dynfn_api::util::create_template(&args.template, dynfn_node::dynfn_node_default_conf().as_str())?;
        return Ok(std::process::ExitCode::SUCCESS);
    }

    let settings = dynfn_node::DynFnSettings::from_file(&args.config_file)?;
    let node = dynfn_node::DynFnNode::new(settings).await?;

    if let Some(exec) = args.exec {
        return Ok(run_single(node, ExecMode::Exec, exec).await);
    }
    if let Some(exec) = args.exec_out {
        return Ok(run_single(node, ExecMode::ExecOut, exec).await);
    }

    let tools = dynfn_node::tools::Tools::new(node);
    let out = match args.command {
        None => {
            log::debug!("Bye");
            return Ok(std::process::ExitCode::SUCCESS);
        }
        Some(command) => match command {
            Commands::List {} => tools.list().await,
            Commands::Inspect { name, full } => tools.inspect(&name, full).await,
            Commands::Register {
                name,
                description,
                parameters,
                kind,
                body,
                body_file,
                output_instructions,
            } => {
                let body = match (body, body_file) {
                    (Some(body), _) => body,
                    (None, Some(path)) => std::fs::read_to_string(&path)?,
                    (None, None) => anyhow::bail!("either --body or --body-file is required"),
                };
                tools
                    .register(dynfn_node::registry::RegisterRequest {
                        name,
                        description,
                        parameters,
                        body,
                        kind,
                        output_instructions,
                    })
                    .await
            }
            Commands::Update { name, field, value } => tools.update(&name, &field, &value).await,
            Commands::Compile { name } => tools.compile(&name).await,
            Commands::Delete { name } => tools.delete(&name).await,
            Commands::Call { name, arguments } => tools.call(&name, &arguments).await,
            Commands::CallProcess { name, arguments } => tools.call_process(&name, &arguments).await,
            Commands::ReadOutput { func } => tools.read_shared_output(&func).await,
            Commands::Catalog {} => tools.catalog().await,
        },
    };
    println!("{}", out);
    Ok(std::process::ExitCode::SUCCESS)
}
