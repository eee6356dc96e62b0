//! End-to-end pack codec tests: typed objects → pack bytes → decoded
//! entries, including the empty pack and a realistic multi-object history.

use std::io::Cursor;
use std::str::FromStr;

use nanogit::hash::ObjectHash;
use nanogit::internal::object::{
    ObjectTrait,
    blob::Blob,
    commit::Commit,
    signature::{Signature, SignatureType},
    tag::Tag,
    tree::{Tree, TreeItem, TreeItemMode},
    types::ObjectType,
};
use nanogit::internal::pack::{
    decode::PackDecoder,
    encode::{empty_pack, encode_pack},
    entry::Entry,
};

fn signature(role: SignatureType) -> Signature {
    Signature::from_data(format!("{role} tester <tester@example.com> 1700000000 +0000").into_bytes())
        .unwrap()
}

fn sample_history() -> (Vec<Entry>, Commit) {
    let readme = Blob::from_content("# sample\n");
    let main_rs = Blob::from_content("fn main() {}\n");
    let src = Tree::from_tree_items(vec![TreeItem::new(
        TreeItemMode::Blob,
        main_rs.id,
        "main.rs".to_string(),
    )])
    .unwrap();
    let root = Tree::from_tree_items(vec![
        TreeItem::new(TreeItemMode::Blob, readme.id, "README.md".to_string()),
        TreeItem::new(TreeItemMode::Tree, src.id, "src".to_string()),
    ])
    .unwrap();
    let commit = Commit::new(
        signature(SignatureType::Author),
        signature(SignatureType::Committer),
        root.id,
        vec![],
        "initial import\n",
    );
    let tag = Tag::new(
        commit.id,
        ObjectType::Commit,
        "v0.1.0".to_string(),
        signature(SignatureType::Tagger),
        "first release\n",
    );

    let entries = vec![
        Entry::from(commit.clone()),
        Entry::from(root),
        Entry::from(src),
        Entry::from(readme),
        Entry::from(main_rs),
        Entry::from(tag),
    ];
    (entries, commit)
}

fn decode_entries(pack: &[u8]) -> Vec<Entry> {
    let mut out = Vec::new();
    PackDecoder::new(|_| None)
        .decode(&mut Cursor::new(pack), |e| out.push(e))
        .expect("pack decodes");
    out
}

/// A full history round-trips: same hashes, same bytes, verified trailer.
#[test]
fn history_roundtrip() {
    let (entries, commit) = sample_history();
    let (pack, signature) = encode_pack(&entries).unwrap();

    // trailer is the SHA-1 of everything before it
    assert_eq!(ObjectHash::new(&pack[..pack.len() - 20]), signature);

    let decoded = decode_entries(&pack);
    assert_eq!(decoded.len(), entries.len());
    for (got, want) in decoded.iter().zip(&entries) {
        assert_eq!(got, want);
        assert_eq!(got.data, want.data);
    }

    // the decoded commit reparses and rehashes to its original id
    let parsed = decoded[0].to_commit().unwrap();
    assert_eq!(parsed.id, commit.id);
    assert_eq!(parsed.object_hash().unwrap(), commit.id);
}

/// Every decoded entry's hash matches `sha1("<type> <len>\0" + data)`.
#[test]
fn decoded_hashes_are_canonical() {
    let (entries, _) = sample_history();
    let (pack, _) = encode_pack(&entries).unwrap();
    for entry in decode_entries(&pack) {
        assert_eq!(
            entry.hash,
            ObjectHash::from_type_and_data(entry.obj_type, &entry.data)
        );
    }
}

/// A zero-object pack (the ref-only push payload) decodes cleanly.
#[test]
fn empty_pack_roundtrip() {
    let pack = empty_pack();
    assert_eq!(pack.len(), 32);
    let decoded = decode_entries(&pack);
    assert!(decoded.is_empty());
}

/// An empty commit (empty tree, no message body) survives the pack codec.
#[test]
fn empty_tree_commit_roundtrip() {
    let empty_tree = Tree::from_tree_items(vec![]).unwrap();
    assert_eq!(
        empty_tree.id,
        ObjectHash::from_str("4b825dc642cb6eb9a060e54bf8d69288fbee4904").unwrap()
    );
    let commit = Commit::new(
        signature(SignatureType::Author),
        signature(SignatureType::Committer),
        empty_tree.id,
        vec![],
        "",
    );

    let (pack, _) = encode_pack(&[Entry::from(commit.clone()), Entry::from(empty_tree)]).unwrap();
    let decoded = decode_entries(&pack);
    assert_eq!(decoded.len(), 2);
    assert_eq!(decoded[0].to_commit().unwrap().id, commit.id);
}

/// Corrupting any single byte of the body breaks the trailer check.
#[test]
fn corruption_is_detected() {
    let (entries, _) = sample_history();
    let (mut pack, _) = encode_pack(&entries).unwrap();
    pack[20] ^= 0x01;
    let result = PackDecoder::new(|_| None).decode(&mut Cursor::new(&pack), |_| {});
    assert!(result.is_err());
}
