use argp::FromArgs;

pub mod cmd;
pub(crate) mod util;

#[derive(FromArgs, Debug)]
#[argp(subcommand)]
pub enum SubCommand {
    Info(cmd::info::Args),
    List(cmd::list::Args),
    Extract(cmd::extract::Args),
    Cue(cmd::cue::Args),
}

pub fn run(command: SubCommand) -> odi::Result<()> {
    match command {
        SubCommand::Info(c_args) => cmd::info::run(c_args),
        SubCommand::List(c_args) => cmd::list::run(c_args),
        SubCommand::Extract(c_args) => cmd::extract::run(c_args),
        SubCommand::Cue(c_args) => cmd::cue::run(c_args),
    }
}
