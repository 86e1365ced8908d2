//! End-to-end scenarios exercising the public `FileSystem` surface
//! against a freshly formatted image (spec.md §8.3).

use std::path::PathBuf;
use std::thread;

use s7xx_fs::error::Error;
use s7xx_fs::layout::{self, MediaType, ObjectKind};
use s7xx_fs::vfs::FileSystem;
use s7xx_fs::{Dentry, FileType};

fn scratch_image(extra_clusters: u64) -> PathBuf {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let path = tmp.into_temp_path().keep().unwrap();
    let size = layout::AUDIO_SECTION_OFFSET + extra_clusters * layout::CLUSTER_SIZE;
    let file = std::fs::OpenOptions::new()
        .write(true)
        .open(&path)
        .unwrap();
    file.set_len(size).unwrap();
    path
}

fn mounted(extra_clusters: u64, label: &str) -> std::sync::Arc<FileSystem> {
    let path = scratch_image(extra_clusters);
    FileSystem::create(&path, label).unwrap()
}

#[test]
fn mount_and_list_root() {
    let fs = mounted(1, "Test S7XX FS");
    let entries = fs.list("/").unwrap();

    let names: Vec<&str> = entries.iter().map(|d| d.fname.as_str()).collect();
    assert_eq!(names, vec!["Volumes", "Performances", "Patches", "Partials", "Samples"]);

    let volumes = entries.iter().find(|d| d.fname == "Volumes").unwrap();
    assert_eq!(volumes.fsize, 128 * 32);
    assert_eq!(volumes.ftype, FileType::Dir);

    let samples = entries.iter().find(|d| d.fname == "Samples").unwrap();
    assert_eq!(samples.fsize, 8192 * 32);
}

#[test]
fn list_sample_directory_after_truncate() {
    let fs = mounted(100, "Test S7XX FS");
    fs.ftruncate("/Samples/0-Test_01", 48 + 94 * layout::CLUSTER_SIZE)
        .unwrap();

    let entries = fs.list("/Samples").unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].fname, "0-Test_01");
    assert_eq!(entries[0].fsize, 48 + 94 * layout::CLUSTER_SIZE);
    assert_eq!(entries[0].ftype, FileType::File);
}

#[test]
fn grow_by_truncate_updates_free_counter() {
    let fs = mounted(200, "Test S7XX FS");

    let before_free = {
        let entries = fs.list("/").unwrap();
        let _ = entries;
        fs.stat("/").unwrap()
    };
    let _ = before_free;

    fs.ftruncate("/Samples/0-NAME_TRUNC_TEST", 48 + 19 * layout::CLUSTER_SIZE)
        .unwrap();

    let entries = fs.list("/Samples").unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].fsize, 48 + 19 * layout::CLUSTER_SIZE);

    fs.ftruncate("/Samples/0-NAME_TRUNC_TEST", 48 + 19 * layout::CLUSTER_SIZE)
        .unwrap();
    let entries_again = fs.list("/Samples").unwrap();
    assert_eq!(entries_again[0].fsize, entries[0].fsize);
}

#[test]
fn os_promotion_via_truncate() {
    let fs = mounted(200, "Test S7XX FS");

    assert!(fs.list("/").unwrap().iter().all(|d: &Dentry| d.fname != "OS"));

    fs.ftruncate("/OS", layout::OS_SIZE + 1).unwrap();

    let entries = fs.list("/").unwrap();
    let os = entries.iter().find(|d| d.fname == "OS").unwrap();
    assert_eq!(os.fsize, layout::OS_SIZE + layout::S760_EXT_OS_SIZE);
}

#[test]
fn open_and_remove_guard() {
    let fs = mounted(10, "Test S7XX FS");
    fs.ftruncate("/Samples/0-Held", 48).unwrap();

    let _stream = fs.open("/Samples/0-Held").unwrap();
    let err = fs.remove("/Samples/0-Held").unwrap_err();
    assert!(matches!(err, Error::AlreadyOpen));

    let entries = fs.list("/Samples").unwrap();
    assert_eq!(entries.len(), 1);
}

#[test]
fn open_and_truncate_guard() {
    let fs = mounted(200, "Test S7XX FS");
    fs.ftruncate("/Samples/0-Held", 48).unwrap();

    let _stream = fs.open("/Samples/0-Held").unwrap();
    let err = fs
        .ftruncate("/Samples/0-Held", 48 + 5 * layout::CLUSTER_SIZE)
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyOpen));
}

#[test]
fn truncate_via_handle_bypasses_already_open() {
    let fs = mounted(200, "Test S7XX FS");
    fs.ftruncate("/Samples/0-Held", 48).unwrap();

    let mut stream = fs.open("/Samples/0-Held").unwrap();

    let err = fs
        .ftruncate("/Samples/0-Held", 48 + 5 * layout::CLUSTER_SIZE)
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyOpen));

    stream.truncate(48 + 5 * layout::CLUSTER_SIZE).unwrap();

    let entries = fs.list("/Samples").unwrap();
    assert_eq!(entries[0].fsize, 48 + 5 * layout::CLUSTER_SIZE);

    let err = fs
        .ftruncate("/Samples/0-Held", 48 + 2 * layout::CLUSTER_SIZE)
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyOpen));
}

#[test]
fn remove_kind_directory_deletes_all_occupants() {
    let fs = mounted(10, "Test S7XX FS");
    for i in 0..3u16 {
        fs.ftruncate(&format!("/Patches/{}-P{}", i, i), 0).unwrap();
    }
    assert_eq!(fs.list("/Patches").unwrap().len(), 3);

    fs.remove("/Patches").unwrap();
    assert_eq!(fs.list("/Patches").unwrap().len(), 0);
}

#[test]
fn remove_kind_directory_skips_open_slots() {
    let fs = mounted(10, "Test S7XX FS");
    for i in 0..3u16 {
        fs.ftruncate(&format!("/Patches/{}-P{}", i, i), 0).unwrap();
    }
    let _held = fs.open("/Patches/1-P1").unwrap();

    let err = fs.remove("/Patches").unwrap_err();
    assert!(matches!(err, Error::AlreadyOpen));

    let remaining = fs.list("/Patches").unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].fname, "1-P1");
}

#[test]
fn remove_root_deletes_every_kind_and_os() {
    let fs = mounted(10, "Test S7XX FS");
    fs.ftruncate("/Patches/0-P", 0).unwrap();
    fs.ftruncate("/Volumes/0-V", 0).unwrap();
    fs.ftruncate("/OS", layout::OS_SIZE).unwrap();

    fs.remove("/").unwrap();

    assert_eq!(fs.list("/Patches").unwrap().len(), 0);
    assert_eq!(fs.list("/Volumes").unwrap().len(), 0);
    assert!(fs.list("/").unwrap().iter().all(|d| d.fname != "OS"));
}

#[test]
fn remove_os_component_reverts_media_type() {
    let fs = mounted(10, "Test S7XX FS");
    fs.ftruncate("/OS", layout::OS_SIZE).unwrap();
    assert!(fs.list("/").unwrap().iter().any(|d| d.fname == "OS"));

    fs.remove("/OS").unwrap();
    assert!(fs.list("/").unwrap().iter().all(|d| d.fname != "OS"));
}

#[test]
fn multithreaded_disjoint_sample_writes() {
    let fs = mounted(400, "Test S7XX FS");

    for i in 0..8u16 {
        fs.ftruncate(&format!("/Samples/{}-mt_test_{}", i, i), 48)
            .unwrap();
    }

    let handles: Vec<_> = (0..8u16)
        .map(|i| {
            let fs = fs.clone();
            thread::spawn(move || {
                let path = format!("/Samples/{}-mt_test_{}", i, i);
                let len = ((i as u64 + 1 + 20) * layout::CLUSTER_SIZE) as usize;
                fs.ftruncate(&path, 48 + len as u64).unwrap();
                let mut stream = fs.open(&path).unwrap();
                let buf = vec![(i + 1) as u8; len];
                stream.seek(48);
                let mut written = 0;
                while written < buf.len() {
                    written += stream.write(&buf[written..]).unwrap();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    for i in 0..8u16 {
        let path = format!("/Samples/{}-mt_test_{}", i, i);
        let expected_len = ((i as u64 + 1 + 20) * layout::CLUSTER_SIZE) as usize;
        let mut stream = fs.open(&path).unwrap();
        stream.seek(48);
        let mut buf = vec![0u8; expected_len];
        let mut total = 0;
        while total < buf.len() {
            match stream.read(&mut buf[total..]) {
                Ok(n) => total += n,
                Err(Error::EndOfFile) => break,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(total, expected_len);
        assert!(buf.iter().all(|&b| b == (i + 1) as u8));
    }
}

#[test]
fn truncate_beyond_max_sample_size_fails() {
    let fs = mounted(10, "Test S7XX FS");
    let err = fs
        .ftruncate("/Samples/0-TooBig", layout::MAX_SAMPLE_SIZE + 2)
        .unwrap_err();
    assert!(matches!(err, Error::FileTooLarge));
}

#[test]
fn rename_keeps_index_and_updates_name() {
    let fs = mounted(10, "Test S7XX FS");
    fs.ftruncate("/Patches/0-Old", 0).unwrap();
    fs.rename("/Patches/0-Old", "New").unwrap();

    let entries = fs.list("/Patches").unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].fname, "0-New");
}

#[test]
fn media_type_enum_round_trips() {
    assert_eq!(MediaType::from_byte(0x00), Some(MediaType::Hdd));
    assert_eq!(MediaType::from_byte(0x20), Some(MediaType::HddWithOs));
    assert_eq!(MediaType::from_byte(0x40), Some(MediaType::HddWithOsS760));
    assert_eq!(MediaType::from_byte(0x80), None);
}

#[test]
fn object_kind_dir_names_round_trip() {
    for kind in ObjectKind::ALL {
        assert_eq!(ObjectKind::from_dir_name(kind.dir_name()), Some(kind));
    }
}
