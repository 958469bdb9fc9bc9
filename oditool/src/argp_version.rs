use std::ffi::OsStr;

use argp::{EarlyExit, FromArgs, TopLevelCommand};

struct ArgsOrVersion<T: FromArgs>(pub T);

impl<T: FromArgs> TopLevelCommand for ArgsOrVersion<T> {}

impl<T: FromArgs> FromArgs for ArgsOrVersion<T> {
    fn _from_args(
        command_name: &[&str],
        args: &[&OsStr],
        parent: Option<&mut dyn argp::parser::ParseGlobalOptions>,
    ) -> Result<Self, EarlyExit> {
        /// Also use argp for catching `--version`-formatted arguments.
        #[derive(FromArgs)]
        struct Version {
            /// Print version information and exit.
            #[argp(switch, short = 'V')]
            pub version: bool,
        }

        match Version::from_args(command_name, args) {
            Ok(v) => {
                if v.version {
                    println!(
                        "{} {}",
                        command_name.first().unwrap_or(&""),
                        env!("CARGO_PKG_VERSION")
                    );
                    std::process::exit(0);
                }
                // Pass through to the inner parser; `Version` only matches
                // when no other arguments are present.
                T::_from_args(command_name, args, parent).map(Self)
            }
            Err(exit) => match exit {
                EarlyExit::Help(_help) => {
                    // Defer to the inner parser so the real help is printed.
                    T::from_args(command_name, args).map(Self)
                }
                EarlyExit::Err(_err) => T::_from_args(command_name, args, parent).map(Self),
            },
        }
    }
}

/// Create a `FromArgs` type from the current process's `env::args`, with
/// `-V` / `--version` handled before subcommand parsing.
///
/// This function will exit early from the current process if argument parsing
/// was unsuccessful or if information like `--help` was requested.
pub fn from_env<T: TopLevelCommand>() -> T {
    argp::parse_args_or_exit::<ArgsOrVersion<T>>(argp::DEFAULT).0
}
