use std::{collections::BTreeMap, fs, path::Path};

use crossfill::{
    bencode::{self, Bencode},
    metadata::{Error, ItemMetadata, TorrentInfo},
    reconcile, to_hex,
};

fn dict(entries: Vec<(&str, Bencode)>) -> Bencode {
    Bencode::Dict(
        entries
            .into_iter()
            .map(|(k, v)| (k.as_bytes().to_vec(), v))
            .collect::<BTreeMap<_, _>>(),
    )
}

fn text(s: &str) -> Bencode {
    Bencode::Bytes(s.as_bytes().to_vec())
}

fn single_file_info(name: &str, piece_length: i64, length: i64) -> Bencode {
    dict(vec![
        ("name", text(name)),
        ("piece length", Bencode::Int(piece_length)),
        ("length", Bencode::Int(length)),
        ("pieces", Bencode::Bytes(vec![0; 20])),
    ])
}

fn resume(save_path: &Path, name: &str, pieces: &[u8]) -> Bencode {
    dict(vec![
        ("qBt-savePath", text(&save_path.to_string_lossy())),
        ("qBt-name", text(name)),
        ("pieces", Bencode::Bytes(pieces.to_vec())),
    ])
}

fn write_pair(dir: &Path, hash: &str, info: Bencode, resume: Bencode) {
    let torrent = dict(vec![("announce", text("http://tracker")), ("info", info)]);
    fs::write(dir.join(format!("{hash}.torrent")), bencode::encode(&torrent)).unwrap();
    fs::write(dir.join(format!("{hash}.fastresume")), bencode::encode(&resume)).unwrap();
}

#[test]
fn loads_single_file_item() {
    let dir = tempfile::tempdir().unwrap();
    let info = single_file_info("movie.mkv", 4, 10);
    let expected_hash = {
        use sha1::{Digest, Sha1};
        to_hex(&Sha1::digest(bencode::encode(&info)))
    };
    write_pair(dir.path(), "abc", info, resume(dir.path(), "renamed.mkv", &[1, 0, 1]));

    let meta = ItemMetadata::load(dir.path(), "abc").unwrap();

    assert_eq!(meta.info.piece_length, 4);
    assert_eq!(meta.info.total_length, 10);
    assert_eq!(to_hex(&meta.info.info_hash), expected_hash);
    assert_eq!(meta.content_root(), dir.path().join("renamed.mkv"));
    assert_eq!(meta.file_layout(), vec![(dir.path().join("renamed.mkv"), 10)]);
    let bits: Vec<bool> = meta.bitfield().unwrap().iter().collect();
    assert_eq!(bits, vec![true, false, true]);
}

#[test]
fn multi_file_layout_and_name_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let info = dict(vec![
        ("name", text("album")),
        ("piece length", Bencode::Int(8)),
        (
            "files",
            Bencode::List(vec![
                dict(vec![
                    ("length", Bencode::Int(5)),
                    ("path", Bencode::List(vec![text("cd1"), text("01.flac")])),
                ]),
                dict(vec![
                    ("length", Bencode::Int(7)),
                    ("path", Bencode::List(vec![text("cover.jpg")])),
                ]),
            ]),
        ),
    ]);
    let resume = dict(vec![
        ("save_path", text(&dir.path().to_string_lossy())),
        ("pieces", Bencode::Bytes(vec![0, 0])),
    ]);
    write_pair(dir.path(), "multi", info, resume);

    let meta = ItemMetadata::load(dir.path(), "multi").unwrap();

    assert_eq!(meta.content_name, "album");
    assert_eq!(meta.info.total_length, 12);
    let root = dir.path().join("album");
    assert_eq!(
        meta.file_layout(),
        vec![(root.join("cd1").join("01.flac"), 5), (root.join("cover.jpg"), 7)]
    );
}

fn multi_file_info(files: &[(i64, &[&str])]) -> Bencode {
    let files = files
        .iter()
        .map(|(length, path)| {
            dict(vec![
                ("length", Bencode::Int(*length)),
                ("path", Bencode::List(path.iter().map(|c| text(c)).collect())),
            ])
        })
        .collect();
    dict(vec![
        ("name", text("pack")),
        ("piece length", Bencode::Int(4)),
        ("files", Bencode::List(files)),
    ])
}

#[test]
fn rejects_file_paths_leaving_the_content_root() {
    for path in [
        &["..", "escape.txt"][..],
        &["ok", "..", "..", "escape.txt"][..],
        &["/etc/passwd"][..],
        &["sub", "/abs"][..],
        &["a/../../b"][..],
        &[][..],
    ] {
        let info = multi_file_info(&[(1, &["fine.txt"][..]), (3, path)]);
        let result = TorrentInfo::from_bencode(&info, "h");
        assert!(
            matches!(result, Err(Error::Invalid { field: "files.path", .. })),
            "path {path:?} was accepted"
        );
    }
}

#[test]
fn accepts_plain_nested_file_paths() {
    let info = multi_file_info(&[(1, &["disc 1", "track.flac"][..]), (2, &["./notes.txt"][..])]);
    let info = TorrentInfo::from_bencode(&info, "h").unwrap();
    assert_eq!(info.total_length, 3);
}

#[test]
fn rejects_total_length_overflow() {
    let info = multi_file_info(&[
        (i64::MAX, &["a"][..]),
        (i64::MAX, &["b"][..]),
        (i64::MAX, &["c"][..]),
    ]);
    assert!(matches!(
        TorrentInfo::from_bencode(&info, "h"),
        Err(Error::Invalid { field: "files.length", .. })
    ));
}

#[test]
fn rejects_content_name_leaving_the_save_path() {
    let dir = tempfile::tempdir().unwrap();
    write_pair(
        dir.path(),
        "h",
        single_file_info("f", 4, 4),
        resume(dir.path(), "../outside", &[0]),
    );
    assert!(matches!(
        ItemMetadata::load(dir.path(), "h"),
        Err(Error::Invalid { field: "name", .. })
    ));
}

#[test]
fn uses_info_embedded_in_resume_data() {
    let dir = tempfile::tempdir().unwrap();
    let resume = dict(vec![
        ("qBt-savePath", text(&dir.path().to_string_lossy())),
        ("pieces", Bencode::Bytes(vec![1])),
        ("info", single_file_info("x.bin", 16, 3)),
    ]);
    fs::write(dir.path().join("h.fastresume"), bencode::encode(&resume)).unwrap();

    let meta = ItemMetadata::load(dir.path(), "h").unwrap();

    assert_eq!(meta.content_name, "x.bin");
    assert_eq!(meta.info.total_length, 3);
}

#[test]
fn missing_torrent_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let resume = resume(dir.path(), "x", &[1]);
    fs::write(dir.path().join("h.fastresume"), bencode::encode(&resume)).unwrap();

    assert!(matches!(
        ItemMetadata::load(dir.path(), "h"),
        Err(Error::Io { .. })
    ));
}

#[test]
fn missing_resume_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        ItemMetadata::load(dir.path(), "nope"),
        Err(Error::Io { .. })
    ));
}

#[test]
fn corrupt_resume_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("h.fastresume"), b"d5:oops").unwrap();
    assert!(matches!(
        ItemMetadata::load(dir.path(), "h"),
        Err(Error::Bencode { .. })
    ));
}

#[test]
fn rejects_unknown_piece_flags() {
    let dir = tempfile::tempdir().unwrap();
    write_pair(
        dir.path(),
        "h",
        single_file_info("f", 4, 8),
        resume(dir.path(), "f", &[1, 7]),
    );
    fs::write(dir.path().join("f"), [0u8; 8]).unwrap();

    let meta = ItemMetadata::load(dir.path(), "h").unwrap();
    assert!(matches!(meta.open(), Err(Error::Pieces { .. })));
}

#[test]
fn rejects_pieces_that_are_not_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let resume = dict(vec![
        ("qBt-savePath", text(&dir.path().to_string_lossy())),
        ("pieces", Bencode::List(vec![Bencode::Int(1)])),
    ]);
    write_pair(dir.path(), "h", single_file_info("f", 4, 4), resume);

    assert!(matches!(
        ItemMetadata::load(dir.path(), "h"),
        Err(Error::Invalid { field: "pieces", .. })
    ));
}

#[test]
fn rejects_zero_piece_length() {
    let dir = tempfile::tempdir().unwrap();
    write_pair(
        dir.path(),
        "h",
        single_file_info("f", 0, 4),
        resume(dir.path(), "f", &[]),
    );
    assert!(matches!(
        ItemMetadata::load(dir.path(), "h"),
        Err(Error::Invalid { field: "piece length", .. })
    ));
}

#[test]
fn open_fails_when_content_is_missing() {
    let dir = tempfile::tempdir().unwrap();
    write_pair(
        dir.path(),
        "h",
        single_file_info("gone", 4, 4),
        resume(dir.path(), "gone", &[0]),
    );
    let meta = ItemMetadata::load(dir.path(), "h").unwrap();
    assert!(matches!(meta.open(), Err(Error::Open(_))));
}

#[test]
fn fills_on_disk_content_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let a_dir = dir.path().join("a");
    let b_dir = dir.path().join("b");
    fs::create_dir_all(&a_dir).unwrap();
    fs::create_dir_all(&b_dir).unwrap();
    fs::write(a_dir.join("data"), [0u8; 10]).unwrap();
    fs::write(b_dir.join("data"), b"HELLOWORLD").unwrap();

    write_pair(
        dir.path(),
        "aaaa",
        single_file_info("data", 10, 10),
        resume(&a_dir, "data", &[0]),
    );
    write_pair(
        dir.path(),
        "bbbb",
        single_file_info("data", 5, 10),
        resume(&b_dir, "data", &[1, 1]),
    );

    let mut items = ["aaaa", "bbbb"]
        .iter()
        .map(|h| ItemMetadata::load(dir.path(), h).unwrap().open().unwrap())
        .collect::<Vec<_>>();
    let events = reconcile(&mut items).unwrap();
    for item in &mut items {
        item.backend.flush().unwrap();
    }
    drop(items);

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].target, "aaaa");
    assert_eq!(events[0].donor, "bbbb");
    assert_eq!(fs::read(a_dir.join("data")).unwrap(), b"HELLOWORLD");
}
