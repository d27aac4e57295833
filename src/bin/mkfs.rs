use oxfs::{block::storage::file::FileStorage, fs::Filesystem};

fn usage() -> ! {
    eprintln!("mkfs.oxfs device");
    std::process::exit(1);
}

fn main() {
    let mut storage_path = None;
    let args = std::env::args().skip(1);
    for arg in args {
        if storage_path.is_none() {
            storage_path = Some(arg);
        } else {
            eprintln!("mkfs.oxfs: too many arguments");
            usage();
        }
    }

    let storage_path = if let Some(path) = storage_path {
        path
    } else {
        eprintln!("mkfs.oxfs: no device specified");
        std::process::exit(1);
    };

    let storage = match FileStorage::open(&storage_path) {
        Ok(storage) => storage,
        Err(e) => {
            eprintln!(
                "mkfs.oxfs: failed to open device {}: {}",
                storage_path,
                std::io::Error::from_raw_os_error(e)
            );
            std::process::exit(-1);
        }
    };

    match Filesystem::format(storage) {
        Ok(fs) => {
            let stat = fs.statfs().expect("statfs on a fresh filesystem");
            eprintln!(
                "mkfs.oxfs: created filesystem on {} with {} inodes and {} data blocks",
                storage_path, stat.inode_num_tot, stat.data_block_num_tot
            );
        }
        Err(e) => {
            eprintln!(
                "mkfs.oxfs: failed to create filesystem on {}: {}",
                storage_path,
                std::io::Error::from_raw_os_error(e.into())
            );
            std::process::exit(-2);
        }
    }
}
