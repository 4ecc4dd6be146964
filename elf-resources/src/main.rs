// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    clap::{Arg, ArgMatches, Command},
    elf_resources::{
        cleanup, extract,
        icons::{self, Icon, IconType},
        Access, BackendKind, ElfResourceError, OpenOptions, ResourceFile, StorageType,
    },
    log::{info, LevelFilter},
    std::{io::Write, path::Path, str::FromStr},
};

const BACKEND_ABOUT: &str = "\
Backend used to access the binary.

edit rewrites the section table with goblin. build uses the object crate's
ELF builder and replaces the file atomically. read is a read-only parser.

Defaults to the value of ELF_RESOURCES_BACKEND, then to read for read-only
commands and edit for commands modifying the binary.
";

fn open(args: &ArgMatches, access: Access) -> Result<ResourceFile, ElfResourceError> {
    let path = args
        .value_of("binary")
        .ok_or_else(|| ElfResourceError::CliBadArgument("binary".to_string()))?;

    let mut options = OpenOptions::new().access(access);
    if let Some(backend) = args.value_of("backend") {
        options = options.backend(BackendKind::from_str(backend)?);
    }

    options.open(path)
}

fn required<'a>(args: &'a ArgMatches, name: &str) -> Result<&'a str, ElfResourceError> {
    args.value_of(name)
        .ok_or_else(|| ElfResourceError::CliBadArgument(name.to_string()))
}

fn command_list(args: &ArgMatches) -> Result<(), ElfResourceError> {
    let file = open(args, Access::Read)?;

    for name in file.names()? {
        println!("{}\t{}", file.size(&name)?, name);
    }

    file.close()
}

fn command_add(args: &ArgMatches) -> Result<(), ElfResourceError> {
    let name = required(args, "name")?;
    let source = required(args, "file")?;
    let storage = if args.is_present("compress") {
        StorageType::Compressed
    } else {
        StorageType::Uncompressed
    };

    let data = std::fs::read(source)
        .map_err(|e| ElfResourceError::OpenFailed(source.into(), e))?;

    let mut file = open(args, Access::ReadWrite)?;
    file.write(name, &data, storage, args.is_present("overwrite"))?;
    file.close()?;

    info!("added {} ({} bytes)", name, data.len());

    Ok(())
}

fn command_get(args: &ArgMatches) -> Result<(), ElfResourceError> {
    let name = required(args, "name")?;

    let file = open(args, Access::Read)?;
    let data = file.read(name)?;
    file.close()?;

    if let Some(output) = args.value_of("output") {
        std::fs::write(output, &data)?;
        info!("wrote {} bytes to {}", data.len(), output);
    } else {
        std::io::stdout().write_all(&data)?;
    }

    Ok(())
}

fn command_size(args: &ArgMatches) -> Result<(), ElfResourceError> {
    let file = open(args, Access::Read)?;
    println!("{}", file.size(required(args, "name")?)?);

    file.close()
}

fn command_remove(args: &ArgMatches) -> Result<(), ElfResourceError> {
    let name = required(args, "name")?;

    let mut file = open(args, Access::ReadWrite)?;
    file.clear(name)?;
    file.close()?;

    info!("removed {}", name);

    Ok(())
}

fn command_set_uuid(args: &ArgMatches) -> Result<(), ElfResourceError> {
    let mut file = open(args, Access::ReadWrite)?;
    icons::set_uuid(&mut file, required(args, "uuid")?)?;

    file.close()
}

fn command_get_uuid(args: &ArgMatches) -> Result<(), ElfResourceError> {
    let file = open(args, Access::Read)?;
    println!("{}", icons::uuid(&file)?);

    file.close()
}

fn command_add_icon(args: &ArgMatches) -> Result<(), ElfResourceError> {
    let source = required(args, "file")?;

    let (icon_type, size) = if args.is_present("svg") {
        (IconType::Svg, 0)
    } else {
        let size = required(args, "size")?;
        let size = u32::from_str(size)
            .map_err(|_| ElfResourceError::CliBadArgument(format!("invalid size: {}", size)))?;

        (IconType::Png, size)
    };

    let name = match args.value_of("name") {
        Some(name) => name.to_string(),
        None => Path::new(source)
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| ElfResourceError::CliBadArgument("name".to_string()))?,
    };

    let icon = Icon::from_file(icon_type, size, source)?;

    let mut file = open(args, Access::ReadWrite)?;
    icons::write_icon(&mut file, &icon, &name, args.is_present("overwrite"))?;
    file.close()?;

    info!("added icon {}", name);

    Ok(())
}

fn command_extract(args: &ArgMatches) -> Result<(), ElfResourceError> {
    let file = open(args, Access::Read)?;
    let dest = extract::extract_resources(&file)?;
    file.close()?;

    // Keep the directory around after we exit.
    cleanup::registry().unregister_folder(&dest);
    println!("{}", dest.display());

    Ok(())
}

fn binary_arg() -> Arg<'static> {
    Arg::new("binary")
        .required(true)
        .help("Path to the ELF binary to operate on")
}

fn main_impl() -> Result<(), ElfResourceError> {
    let app = Command::new("Embed resources in ELF binaries")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Manage resources stored in ELF sections")
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .multiple_occurrences(true)
                .help("Increase logging verbosity. Can be specified multiple times."),
        )
        .arg(
            Arg::new("backend")
                .long("backend")
                .global(true)
                .takes_value(true)
                .possible_values(["edit", "build", "read"])
                .help("Backend used to access the binary")
                .long_help(BACKEND_ABOUT),
        );

    let app = app.subcommand(
        Command::new("list")
            .about("List resources and their sizes")
            .arg(binary_arg()),
    );

    let app = app.subcommand(
        Command::new("add")
            .about("Store the content of a file as a resource")
            .arg(binary_arg())
            .arg(
                Arg::new("name")
                    .required(true)
                    .help("Name of the resource"),
            )
            .arg(
                Arg::new("file")
                    .required(true)
                    .help("File holding the resource content"),
            )
            .arg(
                Arg::new("compress")
                    .long("compress")
                    .help("Store the resource zlib compressed"),
            )
            .arg(
                Arg::new("overwrite")
                    .long("overwrite")
                    .help("Replace an existing resource of the same name"),
            ),
    );

    let app = app.subcommand(
        Command::new("get")
            .about("Print the content of a resource")
            .arg(binary_arg())
            .arg(
                Arg::new("name")
                    .required(true)
                    .help("Name of the resource"),
            )
            .arg(
                Arg::new("output")
                    .long("output")
                    .short('o')
                    .takes_value(true)
                    .help("Write the content to this path instead of stdout"),
            ),
    );

    let app = app.subcommand(
        Command::new("size")
            .about("Print the uncompressed size of a resource")
            .arg(binary_arg())
            .arg(
                Arg::new("name")
                    .required(true)
                    .help("Name of the resource"),
            ),
    );

    let app = app.subcommand(
        Command::new("remove")
            .about("Remove a resource")
            .arg(binary_arg())
            .arg(
                Arg::new("name")
                    .required(true)
                    .help("Name of the resource"),
            ),
    );

    let app = app.subcommand(
        Command::new("set-uuid")
            .about("Set the application UUID, enabling icon resources")
            .arg(binary_arg())
            .arg(
                Arg::new("uuid")
                    .required(true)
                    .help("UUID of the form xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx"),
            ),
    );

    let app = app.subcommand(
        Command::new("get-uuid")
            .about("Print the application UUID")
            .arg(binary_arg()),
    );

    let app = app.subcommand(
        Command::new("add-icon")
            .about("Store an icon and record it in the icon directory")
            .arg(binary_arg())
            .arg(
                Arg::new("file")
                    .required(true)
                    .help("PNG or SVG image file"),
            )
            .arg(
                Arg::new("size")
                    .long("size")
                    .takes_value(true)
                    .required_unless_present("svg")
                    .conflicts_with("svg")
                    .help("Edge length of a square PNG icon in pixels"),
            )
            .arg(
                Arg::new("svg")
                    .long("svg")
                    .help("The icon is an SVG image"),
            )
            .arg(
                Arg::new("name")
                    .long("name")
                    .takes_value(true)
                    .help("Resource name of the icon. Defaults to the file name."),
            )
            .arg(
                Arg::new("overwrite")
                    .long("overwrite")
                    .help("Replace an existing icon of the same name"),
            ),
    );

    let app = app.subcommand(
        Command::new("extract")
            .about("Write all resources into a new temporary directory and print its path")
            .arg(binary_arg()),
    );

    let matches = app.get_matches();

    let log_level = match matches.occurrences_of("verbose") {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level.as_str()),
    );

    // Disable log context except at higher log levels.
    if log_level <= LevelFilter::Info {
        builder
            .format_timestamp(None)
            .format_level(false)
            .format_target(false);
    }

    builder.init();

    match matches.subcommand() {
        Some(("add", args)) => command_add(args),
        Some(("add-icon", args)) => command_add_icon(args),
        Some(("extract", args)) => command_extract(args),
        Some(("get", args)) => command_get(args),
        Some(("get-uuid", args)) => command_get_uuid(args),
        Some(("list", args)) => command_list(args),
        Some(("remove", args)) => command_remove(args),
        Some(("set-uuid", args)) => command_set_uuid(args),
        Some(("size", args)) => command_size(args),
        _ => Err(ElfResourceError::CliUnknownCommand),
    }
}

fn main() {
    let exit_code = match main_impl() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Error: {}", err);
            1
        }
    };

    std::process::exit(exit_code)
}
