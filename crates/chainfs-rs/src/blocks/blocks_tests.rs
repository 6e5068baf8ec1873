use super::*;

#[test]
fn allocate_increments_from_start() {
    let mut reg = BlockRegistry::new();
    let a = reg.allocate(2, 100);
    let b = reg.allocate(2, 50);
    assert_eq!(a.id, BLOCK_ID_START + 1);
    assert_eq!(b.id, BLOCK_ID_START + 2);
    assert!(a.replicas.is_empty());
    assert_eq!(reg.get(b.id).map(|blk| blk.num_bytes), Some(50));
}

#[test]
fn released_ids_are_reused_smallest_first() {
    let mut reg = BlockRegistry::new();
    let ids: Vec<_> = (0..4).map(|_| reg.allocate(2, 1).id).collect();
    reg.release(ids[2]);
    reg.release(ids[0]);
    assert_eq!(reg.free_ids(), vec![ids[0], ids[2]]);

    assert_eq!(reg.next_id(), ids[0]);
    assert_eq!(reg.allocate(3, 1).id, ids[0]);
    assert_eq!(reg.allocate(3, 1).id, ids[2]);
    assert_eq!(reg.allocate(3, 1).id, ids[3] + 1);
    assert!(reg.free_ids().is_empty());
}

#[test]
fn release_of_unknown_block_is_noop() {
    let mut reg = BlockRegistry::new();
    reg.release(99);
    assert!(reg.free_ids().is_empty());
    let id = reg.allocate(2, 1).id;
    reg.release(id);
    reg.release(id);
    assert_eq!(reg.free_ids(), vec![id]);
}

#[test]
fn add_replica_ignores_unknown_blocks() {
    let mut reg = BlockRegistry::new();
    let id = reg.allocate(2, 1).id;
    reg.add_replica(id, 1);
    reg.add_replica(id, 3);
    reg.add_replica(id, 3);
    reg.add_replica(id + 10, 1);
    assert_eq!(reg.get(id).map(|b| b.replicas.clone()), Some(vec![1, 3]));
    assert!(reg.get(id + 10).is_none());
}

#[test]
fn restore_claims_id_from_free_set() {
    let mut reg = BlockRegistry::with_free_ids([3, 5]);
    reg.restore(5, 2, 10);
    reg.restore(9, 2, 10);
    assert_eq!(reg.free_ids(), vec![3]);
    assert_eq!(reg.allocate(2, 1).id, 3);
    assert_eq!(reg.allocate(2, 1).id, 10);
}
