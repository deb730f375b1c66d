pub mod handlers;

use clap::{Arg, ArgAction, Command};

pub fn build_cli() -> Command {
    Command::new("convoy")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Run automation requests concurrently against one repository")
        .subcommand_required(true)
        .arg(
            Arg::new("repo")
                .long("repo")
                .value_name("PATH")
                .global(true)
                .help("Repository root (defaults to the current directory)"),
        )
        .subcommand(cmd_run())
        .subcommand(cmd_status())
        .subcommand(cmd_check())
        .subcommand(cmd_unlock())
}

fn json_flag() -> Arg {
    Arg::new("json")
        .long("json")
        .action(ArgAction::SetTrue)
        .help("Output as JSON")
}

fn cmd_run() -> Command {
    Command::new("run")
        .about("Classify a request and run it directly, in a worktree, or after queueing")
        .arg(
            Arg::new("descriptor")
                .required(true)
                .value_name("DESCRIPTOR")
                .help("Work-item descriptor handed to the engine"),
        )
        .arg(
            Arg::new("branch")
                .long("branch")
                .short('b')
                .required(true)
                .value_name("BRANCH")
                .help("Target branch"),
        )
        .arg(
            Arg::new("wait-policy")
                .long("wait-policy")
                .value_name("POLICY")
                .value_parser(["repoll", "front"])
                .help("How a queued request waits for its turn"),
        )
        .arg(json_flag())
}

fn cmd_status() -> Command {
    Command::new("status")
        .about("Show queued requests, lock holders and isolation instances")
        .arg(json_flag())
}

fn cmd_check() -> Command {
    Command::new("check")
        .about("Check the version-control tool and isolation support")
        .arg(json_flag())
}

fn cmd_unlock() -> Command {
    Command::new("unlock")
        .about("Clear a branch lock left by a dead run")
        .arg(
            Arg::new("branch")
                .required(true)
                .value_name("BRANCH")
                .help("Branch whose lock to clear"),
        )
        .arg(
            Arg::new("force")
                .long("force")
                .action(ArgAction::SetTrue)
                .help("Clear even if the recorded owner is still running"),
        )
        .arg(json_flag())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        build_cli().debug_assert();
    }

    #[test]
    fn test_run_requires_branch() {
        let result = build_cli().try_get_matches_from(["convoy", "run", "plan.yaml"]);
        assert!(result.is_err());

        let matches = build_cli()
            .try_get_matches_from(["convoy", "run", "plan.yaml", "-b", "main", "--json"])
            .unwrap();
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "run");
        assert_eq!(sub.get_one::<String>("branch").map(String::as_str), Some("main"));
        assert!(sub.get_flag("json"));
    }

    #[test]
    fn test_repo_flag_is_global() {
        let matches = build_cli()
            .try_get_matches_from(["convoy", "status", "--repo", "/tmp/r"])
            .unwrap();
        let (_, sub) = matches.subcommand().unwrap();
        assert_eq!(sub.get_one::<String>("repo").map(String::as_str), Some("/tmp/r"));
    }
}
