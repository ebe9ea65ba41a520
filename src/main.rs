//! Main entry point for the Linux memory checker
use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use regex::Regex;
use std::path::Path;

use linuxmemcheck::cli::args::{Cli, OutputFormatArg, PluginCommand};
use linuxmemcheck::core::offsets::StructureLayouts;
use linuxmemcheck::core::profile::Profile;
use linuxmemcheck::formats::traits::{OutputDestination, OutputFormat, OutputWriter};
use linuxmemcheck::kernel::modules::{load_module_list, ModuleRange};
use linuxmemcheck::memory::{AddressSpace, Arch, FlatSpace, MemoryMap, SnapshotSpace};
use linuxmemcheck::plugins::plugin_trait::{AnalysisContext, ForensicPlugin};
use linuxmemcheck::plugins::{
    list_plugins, CheckOpsPlugin, FilesPlugin, PathPlugin, PathRoot, PathTarget, SyscallPlugin,
    WalkPlugin,
};
use linuxmemcheck::symbols::SymbolResolver;
use linuxmemcheck::translation::MemoryTranslator;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    if cli.list_plugins {
        println!("Available plugins:");
        for (name, description, gate) in list_plugins() {
            println!("  {:<18} {} [{}]", name, description, gate.describe());
        }
        return Ok(());
    }

    let dump_path = cli
        .memory_dump
        .as_deref()
        .context("a memory dump is required")?;
    let Some(command) = &cli.plugin else {
        bail!("no plugin given; run with --list-plugins to see the choices");
    };
    let plugin = build_plugin(command)?;

    info!("Opening memory capture file: {}", dump_path.display());
    let memory_map = MemoryMap::new(&dump_path.to_string_lossy())
        .with_context(|| format!("cannot map {}", dump_path.display()))?;

    let mut symbols = SymbolResolver::new();
    let mut layouts = match SymbolResolver::detect_kernel_version(&memory_map.mapped) {
        Some(version) => {
            info!("Detected kernel version {}", version);
            StructureLayouts::for_kernel(&version)
        }
        None => {
            warn!("Could not detect kernel version; using default x64 structure layouts");
            StructureLayouts::default_x64()
        }
    };
    if let Some(symbol_path) = &cli.symbols {
        load_symbols(&mut symbols, &mut layouts, symbol_path)?;
    }

    let profile = build_profile(&cli, &memory_map, &symbols)?;
    let arch = profile.arch_kind().unwrap_or(Arch::X64);

    let modules: Vec<ModuleRange> = match &cli.modules {
        Some(path) => load_module_list(path, arch)
            .with_context(|| format!("cannot load module list {}", path.display()))?,
        None => {
            debug!("No module list given; only kernel text counts as known code");
            Vec::new()
        }
    };

    plugin.gate().check(&profile).with_context(|| {
        format!(
            "{} requires a {} profile",
            plugin.name(),
            plugin.gate().describe()
        )
    })?;

    let flat_space;
    let snapshot_space;
    let space: &dyn AddressSpace = match cli.flat_base {
        Some(base) => {
            info!("Treating the dump as flat memory at 0x{:x}", base);
            flat_space = FlatSpace::new(&memory_map.mapped[..], base, arch);
            &flat_space
        }
        None => {
            if arch != Arch::X64 {
                bail!("address translation is only implemented for x64; use --flat-base for {} images", arch);
            }
            snapshot_space = SnapshotSpace::new(&memory_map, build_translator(&cli, &memory_map));
            &snapshot_space
        }
    };

    let context = AnalysisContext {
        space,
        layouts: &layouts,
        symbols: &symbols,
        profile: &profile,
        modules: &modules,
        max_depth: cli.max_depth,
    };

    let output = plugin
        .run(&context)
        .with_context(|| format!("{} failed", plugin.name()))?;

    let output_format = match cli.format {
        OutputFormatArg::Text => OutputFormat::Text,
        OutputFormatArg::Csv => OutputFormat::Csv,
        OutputFormatArg::Json => OutputFormat::Json,
        OutputFormatArg::Jsonl => OutputFormat::Jsonl,
    };
    let output_dest = match &cli.output {
        Some(path) => OutputDestination::File(path.clone()),
        None => OutputDestination::Stdout,
    };
    OutputWriter::new(output_format, output_dest).write(plugin.name(), &output)?;

    Ok(())
}

/// `--debug` / `--verbose` pick the default level; RUST_LOG wins when set
fn init_logging(cli: &Cli) {
    let level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn build_plugin(command: &PluginCommand) -> Result<Box<dyn ForensicPlugin>> {
    let plugin: Box<dyn ForensicPlugin> = match command {
        PluginCommand::Files { task, filter } => Box::new(FilesPlugin {
            task: task.clone(),
            filter: filter
                .as_deref()
                .map(Regex::new)
                .transpose()
                .context("invalid --filter regex")?,
        }),
        PluginCommand::Path {
            file,
            dentry,
            mount,
            task,
            root_dentry,
            root_mount,
        } => {
            let target = match (file, dentry, mount) {
                (Some(file), _, _) => PathTarget::File(file.clone()),
                (None, Some(dentry), Some(mount)) => PathTarget::Pair {
                    dentry: dentry.clone(),
                    mount: mount.clone(),
                },
                _ => bail!("path needs --file, or --dentry with --mount"),
            };
            let root = match (task, root_dentry, root_mount) {
                (Some(task), _, _) => PathRoot::Task(task.clone()),
                (None, Some(dentry), Some(mount)) => PathRoot::Pair {
                    dentry: dentry.clone(),
                    mount: mount.clone(),
                },
                _ => bail!("path needs --task, or --root-dentry with --root-mount"),
            };
            Box::new(PathPlugin { target, root })
        }
        PluginCommand::CheckOps {
            address,
            type_name,
            members,
        } => Box::new(CheckOpsPlugin {
            address: address.clone(),
            type_name: type_name.clone(),
            members: members.clone(),
        }),
        PluginCommand::CheckSyscall { count } => Box::new(SyscallPlugin::intel(*count)),
        PluginCommand::CheckSyscallArm { count } => Box::new(SyscallPlugin::arm(*count)),
        PluginCommand::Walk {
            type_name,
            next,
            start,
            name,
            limit,
        } => Box::new(WalkPlugin {
            type_name: type_name.clone(),
            next_member: next.clone(),
            start: start.clone(),
            name_member: name.clone(),
            limit: *limit,
        }),
    };
    Ok(plugin)
}

/// Pick a loader by extension, ELF magic or file name
fn load_symbols(
    symbols: &mut SymbolResolver,
    layouts: &mut StructureLayouts,
    path: &Path,
) -> Result<()> {
    let path_str = path.to_string_lossy();
    info!("Loading symbols from: {}", path_str);

    let is_elf = std::fs::read(path)
        .map(|bytes| bytes.starts_with(b"\x7fELF"))
        .with_context(|| format!("cannot read {}", path_str))?;

    if path_str.ends_with(".json") {
        let dwarf = symbols
            .load_dwarf2json(&path_str)
            .context("failed to load dwarf2json symbols")?;
        layouts.merge_dwarf(&dwarf);
    } else if is_elf {
        symbols
            .load_elf(&path_str)
            .context("failed to load vmlinux symbols")?;
    } else if path_str.contains("kallsyms") {
        symbols
            .load_kallsyms(&path_str)
            .context("failed to load kallsyms")?;
    } else {
        symbols
            .load_system_map(&path_str)
            .context("failed to load System.map")?;
    }

    info!("Symbol resolver holds {} symbols", symbols.symbol_count());
    Ok(())
}

/// os/arch metadata: command-line overrides first, then what the dump and
/// symbol files reveal
fn build_profile(cli: &Cli, memory_map: &MemoryMap, symbols: &SymbolResolver) -> Result<Profile> {
    let mut profile = Profile::new();

    match SymbolResolver::find_linux_banner(&memory_map.mapped) {
        Some(banner) => {
            debug!("Banner: {}", banner);
            profile.set("os", "linux");
            profile.set("banner", &banner);
        }
        None => debug!("No Linux banner in the dump"),
    }
    if let Some(os) = &cli.os {
        profile.set("os", os);
    }

    let arch = match &cli.arch {
        Some(arch) => arch
            .parse::<Arch>()
            .map_err(anyhow::Error::msg)
            .context("invalid --arch")?,
        None => symbols.elf_arch().unwrap_or(Arch::X64),
    };
    profile.set("arch", arch.as_str());

    info!(
        "Profile: os={}, arch={}",
        profile.os().unwrap_or("unknown"),
        arch
    );
    Ok(profile)
}

fn build_translator(cli: &Cli, memory_map: &MemoryMap) -> MemoryTranslator {
    let mut translator = match memory_map.parse_lime_header() {
        Some(regions) if memory_map.is_lime() => {
            info!("LiME header with {} memory regions", regions.len());
            for (i, region) in regions.iter().enumerate() {
                debug!(
                    "Region {}: 0x{:x}-0x{:x} at file offset 0x{:x}",
                    i, region.start, region.end, region.file_offset
                );
            }
            MemoryTranslator::new(regions)
        }
        _ => {
            info!("No LiME header found; assuming raw physical memory capture");
            MemoryTranslator::for_raw_dump(memory_map.len() as u64)
        }
    };
    if let Some(phys_base) = cli.phys_base {
        translator.set_phys_base(phys_base);
    }
    if let Some(page_offset) = cli.page_offset {
        translator.set_page_offset(page_offset);
    }
    translator
}
