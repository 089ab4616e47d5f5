//! Clone and fetch between two on-disk repositories over upload-pack.

use std::collections::HashSet;
use std::io::Cursor;
use tempfile::TempDir;
use tessera_git::{
    read_advertisement, read_pack_response, reachable, upload_pack, write_wants, PackParser,
    PktLineReader, PktLineWriter, UploadPack, UploadPackOptions,
};
use tessera_storage::{
    Commit, FileMode, Object, ObjectId, PackWriter, RefSource, Repository, Signature, Time, Tree,
    TreeEntry,
};

struct Server {
    _dir: TempDir,
    repo: Repository,
}

impl Server {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path().join("server.git")).unwrap();
        Self { _dir: dir, repo }
    }

    fn put(&self, object: Object) -> ObjectId {
        self.repo.objects().put(&object).unwrap()
    }

    fn commit(&self, files: &[(&str, &str)], parents: Vec<ObjectId>, message: &str) -> ObjectId {
        let mut entries = Vec::new();
        for (name, content) in files {
            let blob = self.put(Object::blob(content.as_bytes().to_vec()));
            entries.push(TreeEntry::new(FileMode::Regular, *name, blob));
        }
        let docs = self.put(Object::blob(b"# docs\n".to_vec()));
        let sub = self.put(Object::Tree(
            Tree::new(vec![TreeEntry::new(FileMode::Regular, "README.md", docs)]).unwrap(),
        ));
        entries.push(TreeEntry::new(FileMode::Tree, "docs", sub));
        let tree = self.put(Object::Tree(Tree::new(entries).unwrap()));

        let author_time = Time::new(1_700_000_000, 60).unwrap();

        let author = Signature::new("Ada", "ada@example.com", author_time).unwrap();
        let committer_time = Time::new(1_700_000_100, -420).unwrap();
        let committer = Signature::new("Bob", "bob@example.com", committer_time).unwrap();
        self.put(Object::Commit(Commit::new(
            tree, parents, author, committer, message,
        )))
    }

    fn set_branch(&self, name: &str, id: ObjectId) {
        let path = self.repo.path().join("refs/heads").join(name);
        std::fs::write(path, format!("{}\n", id)).unwrap();
    }
}

fn client_repo() -> (TempDir, Repository) {
    let dir = TempDir::new().unwrap();
    let repo = Repository::init(dir.path().join("client.git")).unwrap();
    (dir, repo)
}

/// Runs a whole session with the client's request prepared up front.
fn serve(server: &Server, request: Vec<u8>) -> Vec<u8> {
    let mut response = Vec::new();
    upload_pack(
        server.repo.objects(),
        server.repo.refs(),
        Cursor::new(request),
        &mut response,
        UploadPackOptions::default(),
    )
    .unwrap();
    response
}

#[test]
fn test_clone_over_upload_pack() {
    let server = Server::new();
    let c1 = server.commit(&[("main.rs", "fn main() {}\n")], vec![], "Initial\n");
    let c2 = server.commit(
        &[("main.rs", "fn main() { run() }\n"), ("lib.rs", "pub fn run() {}\n")],
        vec![c1],
        "Add lib\n",
    );
    server.set_branch("master", c2);

    let mut request = Vec::new();
    write_wants(
        &mut PktLineWriter::new(&mut request),
        &[c2],
        &[],
        &["ofs-delta", "side-band-64k", "agent=test/1"],
    )
    .unwrap();
    let response = serve(&server, request);

    let mut reader = PktLineReader::new(Cursor::new(response));
    let advertisement = read_advertisement(&mut reader).unwrap();
    assert_eq!(advertisement.refs[0], ("HEAD".to_string(), c2));
    assert_eq!(advertisement.get("refs/heads/master"), Some(c2));
    assert!(advertisement.has_capability("symref=HEAD:refs/heads/master"));

    let pack = read_pack_response(&mut reader, true).unwrap();

    let (_dir, client) = client_repo();
    let ids = PackParser::new(&pack).unpack(client.objects()).unwrap();

    let expected: HashSet<ObjectId> = reachable(server.repo.objects(), &[c2])
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(ids.iter().copied().collect::<HashSet<_>>(), expected);

    // The clone is complete: every object is reachable on the client side.
    assert_eq!(reachable(client.objects(), &[c2]).unwrap().len(), expected.len());
    for id in &expected {
        assert_eq!(
            client.objects().get(id).unwrap(),
            server.repo.objects().get(id).unwrap()
        );
    }
}

#[test]
fn test_incremental_fetch_sends_only_new_objects() {
    let server = Server::new();
    let c1 = server.commit(&[("a.txt", "alpha\n")], vec![], "One\n");
    server.set_branch("master", c1);

    // The first clone goes through a stateless advertisement request.
    let mut adv = Vec::new();
    UploadPack::new(server.repo.objects(), UploadPackOptions::default())
        .advertise_refs(
            server.repo.refs(),
            &mut PktLineWriter::new(&mut adv),
            Some("git-upload-pack"),
        )
        .unwrap();
    let advertisement = read_advertisement(&mut PktLineReader::new(Cursor::new(adv))).unwrap();
    let head = advertisement.get("HEAD").unwrap();
    assert_eq!(head, c1);

    let mut request = Vec::new();
    write_wants(&mut PktLineWriter::new(&mut request), &[head], &[], &[]).unwrap();
    let mut response = Vec::new();
    let mut session = UploadPack::new(server.repo.objects(), UploadPackOptions::default());
    session.skip_advertisement().unwrap();
    session
        .negotiate(
            &mut PktLineReader::new(Cursor::new(request)),
            &mut PktLineWriter::new(&mut response),
        )
        .unwrap();

    let (_dir, client) = client_repo();
    let pack = read_pack_response(&mut PktLineReader::new(Cursor::new(response)), false).unwrap();
    PackParser::new(&pack).unpack(client.objects()).unwrap();
    assert!(client.objects().contains(&c1).unwrap());

    // The server moves on; the client asks for the new tip.
    let c2 = server.commit(&[("a.txt", "alpha\n"), ("b.txt", "beta\n")], vec![c1], "Two\n");
    server.set_branch("master", c2);
    assert_eq!(server.repo.refs().resolve("HEAD").unwrap(), c2);

    let mut request = Vec::new();
    write_wants(&mut PktLineWriter::new(&mut request), &[c2], &[c1], &[]).unwrap();
    let mut response = Vec::new();
    let mut session = UploadPack::new(server.repo.objects(), UploadPackOptions::default());
    session.skip_advertisement().unwrap();
    session
        .negotiate(
            &mut PktLineReader::new(Cursor::new(request)),
            &mut PktLineWriter::new(&mut response),
        )
        .unwrap();

    let pack = read_pack_response(&mut PktLineReader::new(Cursor::new(response)), false).unwrap();
    let objects = PackParser::new(&pack).parse().unwrap();
    // The new commit, its root tree and the new blob. The docs subtree and
    // the old blob are shared with c1.
    assert_eq!(objects.len(), 3);
    for object in &objects {
        client.objects().put_raw(object.kind, &object.payload).unwrap();
    }
    assert!(reachable(client.objects(), &[c2]).is_ok());
}

#[test]
fn test_serves_objects_from_packs() {
    let server = Server::new();
    let blob = Object::blob(b"packed content\n".to_vec());
    let tree = Object::Tree(
        Tree::new(vec![TreeEntry::new(FileMode::Executable, "run.sh", blob.id())]).unwrap(),
    );
    let sig_time = Time::new(1_650_000_000, 0).unwrap();
    let sig = Signature::new("Packer", "packer@example.com", sig_time).unwrap();
    let commit = Object::Commit(Commit::new(tree.id(), vec![], sig.clone(), sig, "Packed\n"));

    let mut writer = PackWriter::new();
    for object in [&blob, &tree, &commit] {
        writer.add_object(object).unwrap();
    }
    writer
        .finish()
        .unwrap()
        .write_to(&server.repo.path().join("objects/pack"))
        .unwrap();
    server.set_branch("master", commit.id());

    let mut request = Vec::new();
    write_wants(
        &mut PktLineWriter::new(&mut request),
        &[commit.id()],
        &[],
        &["side-band"],
    )
    .unwrap();
    let response = serve(&server, request);

    let mut reader = PktLineReader::new(Cursor::new(response));
    read_advertisement(&mut reader).unwrap();
    let pack = read_pack_response(&mut reader, true).unwrap();
    let objects = PackParser::new(&pack).parse().unwrap();
    let ids: HashSet<_> = objects.iter().map(|o| o.id).collect();
    assert_eq!(ids, [blob.id(), tree.id(), commit.id()].into_iter().collect());
}

#[test]
fn test_empty_repository_advertisement() {
    let server = Server::new();
    let response = serve(&server, b"0000".to_vec());

    let mut reader = PktLineReader::new(Cursor::new(response));
    let advertisement = read_advertisement(&mut reader).unwrap();
    assert!(advertisement.refs.is_empty());
    assert!(advertisement.has_capability("ofs-delta"));
    assert!(reader.read().unwrap().is_none());
}
