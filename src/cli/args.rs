//! Command-line argument parsing for the Linux memory checker
use crate::kernel::vfs::DEFAULT_MAX_DEPTH;
use crate::kernel::list::DEFAULT_LIST_LIMIT;
use crate::plugins::plugin_trait::AddressArg;
use clap::{ArgGroup, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "linmemcheck")]
#[command(
    about = "Linux memory forensics: open file paths and kernel pointer provenance",
    long_about = None
)]
pub struct Cli {
    /// Path to memory dump (LiME or raw)
    #[arg(value_name = "MEMORY_DUMP", required_unless_present = "list_plugins")]
    pub memory_dump: Option<PathBuf>,

    /// Plugin to run
    #[command(subcommand)]
    pub plugin: Option<PluginCommand>,

    /// Path to symbol file (System.map, kallsyms, dwarf2json or vmlinux)
    #[arg(short, long, value_name = "FILE")]
    pub symbols: Option<PathBuf>,

    /// Loaded modules as JSON or CSV (name, base, size)
    #[arg(short, long, value_name = "FILE")]
    pub modules: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormatArg,

    /// Output file (default: stdout)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Override the profile's operating system
    #[arg(long, value_name = "OS")]
    pub os: Option<String>,

    /// Override the profile's architecture (x86, x64, arm)
    #[arg(long, value_name = "ARCH")]
    pub arch: Option<String>,

    /// Treat the dump as one flat virtual range starting at this address
    #[arg(long, value_name = "ADDR", value_parser = parse_u64)]
    pub flat_base: Option<u64>,

    /// Physical load address of the kernel image
    #[arg(long, value_name = "ADDR", value_parser = parse_u64)]
    pub phys_base: Option<u64>,

    /// Base of the direct physical map (page_offset_base)
    #[arg(long, value_name = "ADDR", value_parser = parse_u64)]
    pub page_offset: Option<u64>,

    /// Maximum path components walked before giving up
    #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
    pub max_depth: usize,

    /// Enable debug output
    #[arg(short, long)]
    pub debug: bool,

    /// Enable verbose output (warnings, status messages)
    #[arg(short, long)]
    pub verbose: bool,

    /// List available plugins
    #[arg(short, long)]
    pub list_plugins: bool,
}

#[derive(Subcommand)]
pub enum PluginCommand {
    /// Open files of a task with reconstructed paths
    Files {
        /// task_struct address or symbol
        #[arg(long, value_name = "ADDR")]
        task: AddressArg,

        /// Keep only paths matching this regex
        #[arg(long)]
        filter: Option<String>,
    },

    /// Reconstruct one path
    #[command(group(ArgGroup::new("target").required(true).args(["file", "dentry"])))]
    #[command(group(ArgGroup::new("root").required(true).args(["task", "root_dentry"])))]
    Path {
        /// struct file address
        #[arg(long, value_name = "ADDR")]
        file: Option<AddressArg>,

        /// dentry address (requires --mount)
        #[arg(long, value_name = "ADDR", requires = "mount")]
        dentry: Option<AddressArg>,

        /// vfsmount address of the dentry
        #[arg(long, value_name = "ADDR")]
        mount: Option<AddressArg>,

        /// Task whose fs root ends the walk
        #[arg(long, value_name = "ADDR")]
        task: Option<AddressArg>,

        /// Root dentry (requires --root-mount)
        #[arg(long, value_name = "ADDR", requires = "root_mount")]
        root_dentry: Option<AddressArg>,

        /// Root vfsmount
        #[arg(long, value_name = "ADDR")]
        root_mount: Option<AddressArg>,
    },

    /// Check the function pointers of an operations struct
    CheckOps {
        /// Address or symbol of the struct
        #[arg(long, value_name = "ADDR")]
        address: AddressArg,

        /// Struct type, e.g. file_operations
        #[arg(long = "type", value_name = "STRUCT")]
        type_name: String,

        /// Comma-separated members (default: every function pointer)
        #[arg(long, value_delimiter = ',')]
        members: Option<Vec<String>>,
    },

    /// Check sys_call_table (and ia32_sys_call_table on x64)
    CheckSyscall {
        /// Number of entries (default: inferred from the symbol table)
        #[arg(long)]
        count: Option<usize>,
    },

    /// Check the ARM sys_call_table
    CheckSyscallArm {
        /// Number of entries (default: inferred from the symbol table)
        #[arg(long)]
        count: Option<usize>,
    },

    /// Walk a singly linked list
    Walk {
        /// Struct type of each node
        #[arg(long = "type", value_name = "STRUCT")]
        type_name: String,

        /// Member pointing at the next node
        #[arg(long, value_name = "MEMBER")]
        next: String,

        /// First node
        #[arg(long, value_name = "ADDR")]
        start: AddressArg,

        /// Member to print for each node
        #[arg(long, value_name = "MEMBER")]
        name: Option<String>,

        /// Maximum nodes to visit
        #[arg(long, default_value_t = DEFAULT_LIST_LIMIT)]
        limit: usize,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum OutputFormatArg {
    Text,
    Csv,
    Json,
    Jsonl,
}

fn parse_u64(s: &str) -> Result<u64, String> {
    crate::kernel::modules::parse_number(s).ok_or_else(|| format!("'{}' is not a number", s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_path_requires_target_and_root() {
        let ok = Cli::try_parse_from([
            "linmemcheck",
            "dump.lime",
            "path",
            "--dentry",
            "0x1000",
            "--mount",
            "0x2000",
            "--task",
            "init_task",
        ]);
        assert!(ok.is_ok());

        let missing_root =
            Cli::try_parse_from(["linmemcheck", "dump.lime", "path", "--file", "0x1000"]);
        assert!(missing_root.is_err());
    }

    #[test]
    fn test_members_split_on_commas() {
        let cli = Cli::try_parse_from([
            "linmemcheck",
            "--flat-base",
            "0xffff888000000000",
            "dump.raw",
            "check-ops",
            "--address",
            "tcp4_seq_ops",
            "--type",
            "seq_operations",
            "--members",
            "start,show",
        ])
        .unwrap();
        assert_eq!(cli.flat_base, Some(0xffff888000000000));
        match cli.plugin {
            Some(PluginCommand::CheckOps {
                members, address, ..
            }) => {
                assert_eq!(members, Some(vec!["start".to_string(), "show".to_string()]));
                assert_eq!(address, AddressArg::Symbol("tcp4_seq_ops".to_string()));
            }
            _ => panic!("expected check-ops"),
        }
    }
}
