use clap::{Arg, Command};
use exhume_body::file_locator::{FileLocator, HostFileLocator};
use exhume_body::ldm::Database;
use exhume_body::vmdk::VMDK;
use log::error;

fn split_path(file_path: &str) -> (String, String) {
    let path = std::path::Path::new(file_path);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."));
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    (dir.to_string_lossy().into_owned(), name)
}

fn run_vmdk_dump(file_path: &str) {
    let (dir, name) = split_path(file_path);
    let locator = HostFileLocator::new(&dir);
    let vmdk = match VMDK::open(&locator, &name) {
        Ok(vmdk) => vmdk,
        Err(err) => {
            error!("Error opening VMDK: {}", err);
            std::process::exit(1);
        }
    };
    vmdk.print_info();
}

fn run_ldm_dump(file_path: &str, offset: u64) {
    let mut file = match std::fs::File::open(file_path) {
        Ok(f) => f,
        Err(err) => {
            error!("Error opening file: {}", err);
            std::process::exit(1);
        }
    };
    let db = match Database::load(&mut file, offset) {
        Ok(db) => db,
        Err(err) => {
            error!("Error loading LDM database: {}", err);
            std::process::exit(1);
        }
    };
    println!("LDM database header: {:?}", db.header());
    println!("Records: {}", db.len());
    for disk in db.disks() {
        println!("Disk {}: {}", disk.id, disk.name);
    }
    for volume in db.volumes() {
        println!("Volume {}: {} ({} bytes)", volume.id, volume.name, volume.size);
    }
}

fn main() {
    env_logger::init();

    let matches = Command::new("exhume_body")
        .version(env!("CARGO_PKG_VERSION"))
        .author("ForensicXlab")
        .about("Reads VMDK virtual disks and LDM dynamic-disk metadata databases.")
        .subcommand(
            Command::new("vmdk-dump")
                .about("Opens a VMDK descriptor and prints its extent layout.")
                .arg(
                    Arg::new("input")
                        .required(true)
                        .help("Path to the VMDK descriptor or monolithic sparse file."),
                ),
        )
        .subcommand(
            Command::new("ldm-dump")
                .about("Reads an LDM dynamic-disk metadata database and lists its records.")
                .arg(Arg::new("input").required(true).help("Path to the disk image."))
                .arg(
                    Arg::new("offset")
                        .short('o')
                        .long("offset")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("0")
                        .help("Byte offset of the VMDB region within the image."),
                ),
        )
        .get_matches();

    match matches.subcommand() {
        Some(("vmdk-dump", sub)) => {
            let input = sub.get_one::<String>("input").unwrap();
            run_vmdk_dump(input);
        }
        Some(("ldm-dump", sub)) => {
            let input = sub.get_one::<String>("input").unwrap();
            let offset = *sub.get_one::<u64>("offset").unwrap();
            run_ldm_dump(input, offset);
        }
        _ => {
            eprintln!("No subcommand given. Use --help for usage.");
            std::process::exit(1);
        }
    }
}

