use super::*;

fn sample() -> (Namespace, InodeId, InodeId, InodeId) {
    let mut ns = Namespace::default();
    let a = ns.create_directory(ROOT_ID, "a").expect("mkdir a");
    let b = ns.create_directory(a, "b").expect("mkdir b");
    let f = ns.create_file(b, "f.txt", 3, 1024).expect("create f");
    (ns, a, b, f)
}

#[test]
fn root_is_its_own_parent() {
    let ns = Namespace::default();
    let root = ns.get(ns.root()).expect("root");
    assert_eq!(root.parent, ROOT_ID);
    assert!(root.is_dir());
    assert_eq!(ns.path_of(ROOT_ID).as_deref(), Some("/"));
    assert_eq!(ns.resolve("/"), Some(ROOT_ID));
    assert_eq!(ns.resolve(""), Some(ROOT_ID));
}

#[test]
fn resolve_ignores_empty_segments() {
    let (ns, a, b, f) = sample();
    assert_eq!(ns.resolve("/a"), Some(a));
    assert_eq!(ns.resolve("//a/b/"), Some(b));
    assert_eq!(ns.resolve("a/b/f.txt"), Some(f));
    assert_eq!(ns.path_of(b).as_deref(), Some("/a/b"));
    assert_eq!(ns.path_of(f).as_deref(), Some("/a/b/f.txt"));
}

#[test]
fn dot_prefix_resolves_against_base_dir() {
    let mut ns = Namespace::new("/a");
    let a = ns.create_directory(ROOT_ID, "a").expect("mkdir a");
    let b = ns.create_directory(a, "b").expect("mkdir b");
    assert_eq!(ns.resolve("./b"), Some(b));
    assert_eq!(ns.resolve("."), Some(a));
    assert_eq!(ns.split_parent_and_leaf("./b/c"), Some((b, "c".to_string())));
}

#[test]
fn missing_paths_resolve_to_none() {
    let (ns, _, _, _) = sample();
    assert_eq!(ns.resolve("/nope"), None);
    assert_eq!(ns.resolve("/a/b/f.txt/deeper"), None);
    assert_eq!(ns.split_parent_and_leaf("/x/y"), None);
    assert_eq!(ns.path_of(999), None);
}

#[test]
fn split_parent_and_leaf_of_root_has_empty_leaf() {
    let (ns, a, _, _) = sample();
    assert_eq!(ns.split_parent_and_leaf("/"), Some((ROOT_ID, String::new())));
    assert_eq!(ns.split_parent_and_leaf("/a/new"), Some((a, "new".to_string())));
}

#[test]
fn create_rejects_duplicates_and_file_parents() {
    let (mut ns, a, _, f) = sample();
    assert_eq!(
        ns.create_directory(a, "b"),
        Err(FsError::AlreadyExists("/a/b".to_string()))
    );
    assert_eq!(
        ns.create_file(f, "x", 1, 1),
        Err(FsError::NotADirectory("/a/b/f.txt".to_string()))
    );
    assert_eq!(
        ns.create_directory(a, ".."),
        Err(FsError::InvalidName("..".to_string()))
    );
    assert_eq!(ns.create_directory(a, ""), Err(FsError::InvalidName(String::new())));
}

#[test]
fn remove_file_restores_counts_and_frees_blocks() {
    let (mut ns, _, b, _) = sample();
    let mut blocks = BlockRegistry::new();
    let inodes_before = ns.inode_count();

    let g = ns.create_file(b, "g.bin", 3, 16).expect("create g");
    let first = blocks.allocate(g, 16).id;
    let second = blocks.allocate(g, 4).id;
    ns.add_block(g, first).expect("add first");
    ns.add_block(g, second).expect("add second");
    assert_eq!(ns.get(g).map(|i| i.blocks().to_vec()), Some(vec![first, second]));

    ns.remove_inode(g, &mut blocks).expect("remove g");
    assert_eq!(ns.inode_count(), inodes_before);
    assert!(blocks.is_empty());
    assert_eq!(blocks.free_ids(), vec![first, second]);
    assert_eq!(ns.resolve("/a/b/g.bin"), None);
}

#[test]
fn remove_inode_drops_whole_subtree() {
    let (mut ns, a, _, f) = sample();
    let mut blocks = BlockRegistry::new();
    let id = blocks.allocate(f, 1).id;
    ns.add_block(f, id).expect("add block");

    ns.remove_inode(a, &mut blocks).expect("remove a");
    assert_eq!(ns.inode_count(), 1);
    assert!(ns.is_empty_dir(ROOT_ID));
    assert!(blocks.is_free(id));
}

#[test]
fn remove_directory_requires_empty_dir() {
    let (mut ns, a, b, f) = sample();
    assert_eq!(
        ns.remove_directory(a, b),
        Err(FsError::NotEmpty("/a/b".to_string()))
    );
    assert_eq!(
        ns.remove_directory(b, f),
        Err(FsError::NotADirectory("/a/b/f.txt".to_string()))
    );
    let c = ns.create_directory(a, "c").expect("mkdir c");
    ns.remove_directory(a, c).expect("rmdir c");
    assert_eq!(ns.children(a), vec![b]);
}

#[test]
fn root_cannot_be_removed_or_moved() {
    let (mut ns, a, _, _) = sample();
    let mut blocks = BlockRegistry::new();
    assert!(matches!(ns.remove_inode(ROOT_ID, &mut blocks), Err(FsError::IsRoot(_))));
    assert!(matches!(ns.remove_directory(ROOT_ID, ROOT_ID), Err(FsError::IsRoot(_))));
    assert!(matches!(ns.move_inode(ROOT_ID, a, "r"), Err(FsError::IsRoot(_))));
}

#[test]
fn move_into_own_subtree_is_rejected() {
    let (mut ns, a, b, _) = sample();
    let err = ns.move_inode(a, b, "a").unwrap_err();
    assert_eq!(
        err,
        FsError::InvalidMove {
            src: "/a".to_string(),
            dst: "/a/b/a".to_string(),
        }
    );
    assert!(matches!(ns.move_inode(a, a, "x"), Err(FsError::InvalidMove { .. })));
    assert_eq!(ns.path_of(a).as_deref(), Some("/a"));
}

#[test]
fn move_reparents_and_renames() {
    let (mut ns, a, b, f) = sample();
    ns.move_inode(f, a, "moved.txt").expect("move");
    assert_eq!(ns.path_of(f).as_deref(), Some("/a/moved.txt"));
    assert!(ns.is_empty_dir(b));
    assert_eq!(ns.resolve("/a/moved.txt"), Some(f));

    ns.move_inode(b, ROOT_ID, "top").expect("move dir");
    assert_eq!(ns.resolve("/top"), Some(b));
    assert_eq!(
        ns.move_inode(f, ROOT_ID, "top"),
        Err(FsError::AlreadyExists("/top".to_string()))
    );
}

#[test]
fn ancestry_includes_self() {
    let (ns, a, b, f) = sample();
    assert!(ns.is_ancestor(a, a));
    assert!(ns.is_ancestor(a, f));
    assert!(ns.is_ancestor(ROOT_ID, b));
    assert!(!ns.is_ancestor(b, a));
}

#[test]
fn tree_lists_children_by_name() {
    let (mut ns, a, _, _) = sample();
    ns.create_file(a, "0.txt", 1, 1).expect("create");
    let tree = ns.tree(ROOT_ID).expect("tree");
    assert_eq!(tree.path, "/");
    assert_eq!(tree.children.len(), 1);
    let a_node = &tree.children[0];
    assert_eq!(a_node.kind, NodeKind::Dir);
    let names: Vec<_> = a_node.children.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["0.txt", "b"]);
    assert_eq!(a_node.children[1].children[0].path, "/a/b/f.txt");
    assert_eq!(a_node.children[1].children[0].kind, NodeKind::File);
}

#[test]
fn from_parts_rebuilds_links() {
    let (ns, _, b, f) = sample();
    let links: Vec<_> = ns
        .inodes()
        .filter(|i| i.id != ROOT_ID)
        .map(|i| (i.parent, i.id))
        .collect();
    let rebuilt = Namespace::from_parts("/", ns.inodes().cloned(), links).expect("rebuild");
    assert_eq!(rebuilt, ns);
    assert_eq!(rebuilt.resolve("/a/b/f.txt"), Some(f));
    assert_eq!(rebuilt.path_of(b).as_deref(), Some("/a/b"));
}

#[test]
fn from_parts_requires_root() {
    let (ns, _, _, _) = sample();
    let inodes = ns.inodes().filter(|i| i.id != ROOT_ID).cloned();
    assert!(Namespace::from_parts("/", inodes, Vec::new()).is_err());
}
