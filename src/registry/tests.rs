use super::*;
use crate::transport::LoginHandle;

fn did(v: u32) -> Did {
    Did::from_u24(v)
}

fn wwn(v: u64) -> Wwn {
    Wwn::new(v)
}

#[test]
fn test_create_and_find() {
    let mut reg = NodeRegistry::new(8);
    let h = reg.create(did(0x010203)).unwrap();
    assert_eq!(reg.find(did(0x010203)), Some(h));
    assert_eq!(reg.get(h).unwrap().state(), NodeState::NotPresent);
    assert_eq!(reg.ref_count(h).unwrap(), 1);
    assert_eq!(reg.len(), 1);
}

#[test]
fn test_duplicate_did_rejected() {
    let mut reg = NodeRegistry::new(8);
    reg.create(did(1)).unwrap();
    assert_eq!(reg.create(did(1)), Err(RegistryError::DuplicateDid(did(1))));
    assert_eq!(reg.len(), 1);
}

#[test]
fn test_find_or_create_reuses() {
    let mut reg = NodeRegistry::new(8);
    let a = reg.find_or_create(did(5)).unwrap();
    let b = reg.find_or_create(did(5)).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_capacity_exhausted() {
    let mut reg = NodeRegistry::new(2);
    reg.create(did(1)).unwrap();
    reg.create(did(2)).unwrap();
    assert_eq!(
        reg.create(did(3)),
        Err(RegistryError::Exhausted { max: 2 })
    );
}

#[test]
fn test_remove_frees_unreferenced_node() {
    let mut reg = NodeRegistry::new(8);
    let h = reg.create(did(1)).unwrap();
    assert_eq!(reg.remove(h), Ok(Release::Freed));
    assert_eq!(reg.find(did(1)), None);
    assert!(!reg.contains(h));
    assert_eq!(reg.get(h).err(), Some(RegistryError::StaleHandle(h)));
    assert_eq!(reg.live_count(), 0);
}

#[test]
fn test_remove_deferred_until_last_release() {
    let mut reg = NodeRegistry::new(8);
    let h = reg.create(did(1)).unwrap();
    reg.get_ref(h).unwrap();

    assert_eq!(reg.remove(h), Ok(Release::Retained(1)));
    assert_eq!(reg.find(did(1)), None);
    assert_eq!(reg.get(h).unwrap().state(), NodeState::Unused);
    assert_eq!(reg.live_count(), 1);

    // The DID can be reused while the old node drains.
    let h2 = reg.create(did(1)).unwrap();
    assert_ne!(h, h2);

    assert_eq!(reg.put_ref(h), Ok(Release::Freed));
    assert!(!reg.contains(h));
    assert_eq!(reg.find(did(1)), Some(h2));
}

#[test]
fn test_remove_requires_idle_state() {
    let mut reg = NodeRegistry::new(8);
    let h = reg.create(did(1)).unwrap();
    reg.get_mut(h).unwrap().set_state(NodeState::Mapped);
    assert_eq!(
        reg.remove(h),
        Err(RegistryError::InvalidState {
            did: did(1),
            state: NodeState::Mapped
        })
    );
    assert_eq!(reg.find(did(1)), Some(h));
}

#[test]
fn test_remove_twice_fails() {
    let mut reg = NodeRegistry::new(8);
    let h = reg.create(did(1)).unwrap();
    reg.get_ref(h).unwrap();
    reg.remove(h).unwrap();
    assert_eq!(reg.remove(h), Err(RegistryError::NotIndexed(did(1))));
}

#[test]
fn test_slot_reuse_bumps_generation() {
    let mut reg = NodeRegistry::new(8);
    let old = reg.create(did(1)).unwrap();
    reg.remove(old).unwrap();
    let new = reg.create(did(2)).unwrap();
    assert_eq!(old.index(), new.index());
    assert_ne!(old.generation(), new.generation());
    assert!(reg.get_ref(old).is_err());
}

#[test]
fn test_iteration_sorted_by_did() {
    let mut reg = NodeRegistry::new(8);
    for v in [0x30, 0x10, 0x20] {
        reg.create(did(v)).unwrap();
    }
    let dids: Vec<Did> = reg.iter().map(|(_, n)| n.did()).collect();
    assert_eq!(dids, vec![did(0x10), did(0x20), did(0x30)]);
}

#[test]
fn test_find_by_wwpn_ignores_zero() {
    let mut reg = NodeRegistry::new(8);
    let h = reg.create(did(1)).unwrap();
    assert_eq!(reg.find_by_wwpn(Wwn::ZERO), None);
    reg.get_mut(h).unwrap().wwpn = wwn(0xaa);
    assert_eq!(reg.find_by_wwpn(wwn(0xaa)), Some(h));
}

#[test]
fn test_plogi_confirm_records_names() {
    let mut reg = NodeRegistry::new(8);
    let h = reg.create(did(0x010203)).unwrap();
    let r = reg.plogi_confirm(did(0x010203), wwn(0xaa), wwn(0xbb)).unwrap();
    assert_eq!(r.active, h);
    assert_eq!(r.demoted, None);
    assert!(r.stale_logins.is_empty());
    assert_eq!(reg.get(h).unwrap().wwpn(), wwn(0xaa));
    assert_eq!(reg.get(h).unwrap().wwnn(), wwn(0xbb));
}

#[test]
fn test_plogi_confirm_name_change_returns_login() {
    let mut reg = NodeRegistry::new(8);
    let h = reg.create(did(1)).unwrap();
    {
        let node = reg.get_mut(h).unwrap();
        node.wwpn = wwn(0x11);
        node.login = Some(LoginHandle::new(4));
        node.flags.login_registered = true;
    }
    let r = reg.plogi_confirm(did(1), wwn(0x22), wwn(0x23)).unwrap();
    assert_eq!(r.stale_logins, vec![LoginHandle::new(4)]);
    assert!(!reg.get(h).unwrap().flags().login_registered);
}

#[test]
fn test_plogi_confirm_unknown_did() {
    let mut reg = NodeRegistry::new(8);
    assert_eq!(
        reg.plogi_confirm(did(9), wwn(1), wwn(2)),
        Err(RegistryError::NotFound(did(9)))
    );
}

/// PLOGI to 0x010203 confirms a port name already known at 0x040506.
#[test]
fn test_plogi_confirm_swaps_identity() {
    let mut reg = NodeRegistry::new(8);
    let issued = reg.create(did(0x010203)).unwrap();
    let known = reg.create(did(0x040506)).unwrap();
    {
        let node = reg.get_mut(issued).unwrap();
        node.set_state(NodeState::PlogiIssued);
        node.flags.discovery_pending = true;
    }
    {
        let node = reg.get_mut(known).unwrap();
        node.wwpn = wwn(0xaa);
        node.wwnn = wwn(0xab);
        node.login = Some(LoginHandle::new(7));
        node.flags.login_registered = true;
    }

    let r = reg.plogi_confirm(did(0x010203), wwn(0xaa), wwn(0xab)).unwrap();
    assert_eq!(r.active, known);
    assert_eq!(r.demoted, Some(issued));
    assert_eq!(r.stale_logins, vec![LoginHandle::new(7)]);

    assert_eq!(reg.find(did(0x010203)), Some(known));
    assert_eq!(reg.find(did(0x040506)), Some(issued));

    let winner = reg.get(known).unwrap();
    assert_eq!(winner.did(), did(0x010203));
    assert_eq!(winner.state(), NodeState::PlogiIssued);
    assert!(winner.flags().discovery_pending);
    assert!(!winner.flags().login_registered);

    let loser = reg.get(issued).unwrap();
    assert_eq!(loser.did(), did(0x040506));
    assert_eq!(loser.state(), NodeState::NotPresent);
    assert!(loser.wwpn().is_zero());
    assert!(!loser.flags().discovery_pending);

    let at_did: Vec<_> = reg.iter().filter(|(_, n)| n.did() == did(0x010203)).collect();
    assert_eq!(at_did.len(), 1);
}

#[test]
fn test_plogi_confirm_idempotent() {
    let mut reg = NodeRegistry::new(8);
    let issued = reg.create(did(0x010203)).unwrap();
    let known = reg.create(did(0x040506)).unwrap();
    reg.get_mut(known).unwrap().wwpn = wwn(0xaa);
    reg.get_mut(issued).unwrap().set_state(NodeState::PlogiIssued);

    reg.plogi_confirm(did(0x010203), wwn(0xaa), wwn(0xab)).unwrap();
    let snapshot: Vec<(Did, NodeState, Wwn)> = reg
        .iter()
        .map(|(_, n)| (n.did(), n.state(), n.wwpn()))
        .collect();

    let r = reg.plogi_confirm(did(0x010203), wwn(0xaa), wwn(0xab)).unwrap();
    assert_eq!(r.active, known);
    assert_eq!(r.demoted, None);
    let again: Vec<(Did, NodeState, Wwn)> = reg
        .iter()
        .map(|(_, n)| (n.did(), n.state(), n.wwpn()))
        .collect();
    assert_eq!(snapshot, again);
}

#[test]
fn test_reassign_did() {
    let mut reg = NodeRegistry::new(8);
    let a = reg.create(did(1)).unwrap();
    let b = reg.create(did(2)).unwrap();
    assert_eq!(reg.reassign_did(a, did(2)), Err(RegistryError::DuplicateDid(did(2))));
    reg.reassign_did(a, did(3)).unwrap();
    assert_eq!(reg.find(did(3)), Some(a));
    assert_eq!(reg.find(did(1)), None);
    assert_eq!(reg.find(did(2)), Some(b));
}

#[test]
fn test_index_reference_only_dropped_by_remove() {
    let mut reg = NodeRegistry::new(8);
    let h = reg.create(did(1)).unwrap();
    reg.get_ref(h).unwrap();
    assert_eq!(reg.put_ref(h), Ok(Release::Retained(1)));
    assert_eq!(reg.put_ref(h), Err(RegistryError::RefUnderflow(h)));
    assert_eq!(reg.remove(h), Ok(Release::Freed));
    assert_eq!(reg.put_ref(h), Err(RegistryError::StaleHandle(h)));
}
