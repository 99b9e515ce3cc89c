mod common;

use arbor_primitives::identity::PeerId;
use arbor_primitives::message::{Message, MessageType};
use arbor_tree::{TreeConfig, TreeError, TreeEvent};
use common::{
    adopt_by_broken_parent, eventually, join_directly, names, report_state, sorted,
    MemoryNetwork,
};

#[tokio::test]
async fn test_dead_child_is_replaced_by_its_children() {
    let network = MemoryNetwork::new();
    let node = network.spawn_node(&TreeConfig::new(2, 4));

    let (g1, g2) = (PeerId::random(), PeerId::random());
    let mut g1_incoming = network.listen(g1);
    let mut g2_incoming = network.listen(g2);

    let (x, y) = (PeerId::random(), PeerId::random());
    let (mut x_end, _, _) = join_directly(&node.node, x).await;
    let (mut y_end, _, _) = join_directly(&node.node, y).await;

    report_state(&mut x_end, &[g1, g2], 2).await;

    eventually("x's report applied", || async {
        node.node
            .child_reports()
            .await
            .iter()
            .any(|report| report.peer == x && report.children == names(&[g1, g2]))
    })
    .await;

    drop(x_end);

    let forwarded = node.node.publish(b"hi".to_vec()).await;

    assert_eq!(forwarded.delivered, 1, "only y was reachable");
    assert_eq!(forwarded.dead, vec![x], "x detected dead");
    assert_eq!(forwarded.repaired, vec![g1, g2], "orphans reattached in report order");

    assert_eq!(
        node.node.children().await,
        sorted(vec![y, g1, g2]),
        "dead child replaced by its children"
    );

    for incoming in [&mut g1_incoming, &mut g2_incoming] {
        let mut stream = incoming.recv().await.expect("repair dial");
        let welcome = stream.recv().await.unwrap().expect("welcome");

        assert_eq!(welcome.kind, MessageType::Update, "orphan gets a welcome");
        assert_eq!(welcome.peers, names(&[node.id]), "welcome names the repairer");
        assert_eq!(
            (welcome.tree_width, welcome.tree_max_width),
            (2, 4),
            "welcome carries the fan-out"
        );
    }

    let data = y_end.recv().await.unwrap().expect("payload");
    assert_eq!(data.data, b"hi", "live child still served");
}

#[tokio::test]
async fn test_repair_respects_max_width() {
    let network = MemoryNetwork::new();
    let node = network.spawn_node(&TreeConfig::new(1, 2));

    let orphans = [PeerId::random(), PeerId::random(), PeerId::random()];
    let mut incoming: Vec<_> = orphans.iter().map(|orphan| network.listen(*orphan)).collect();

    let x = PeerId::random();
    let (mut x_end, _, _) = join_directly(&node.node, x).await;
    report_state(&mut x_end, &orphans, 3).await;

    eventually("x's report applied", || async {
        node.node.child_reports().await[0].children.len() == 3
    })
    .await;

    drop(x_end);

    let forwarded = node.node.publish(b"hi".to_vec()).await;

    assert_eq!(forwarded.dead, vec![x], "x detected dead");
    assert_eq!(forwarded.repaired, orphans[..2].to_vec(), "room for two under the repair cap");
    assert_eq!(node.node.children().await.len(), 2, "never beyond the repair cap");

    let mut last = incoming.pop().expect("third orphan listener").recv().await.expect("repair dial");
    let redirect = last.recv().await.unwrap().expect("redirect");

    assert_eq!(redirect.kind, MessageType::Update, "overflow orphan redirected");
    let [to] = redirect.peers.as_slice() else {
        panic!("redirect names one peer");
    };
    assert!(
        names(&orphans[..2]).contains(to),
        "redirected below a reattached orphan"
    );
    assert!(last.recv().await.unwrap().is_none(), "redirect stream closed");
}

#[tokio::test]
async fn test_unreachable_orphan_is_skipped() {
    let network = MemoryNetwork::new();
    let node = network.spawn_node(&TreeConfig::new(2, 4));

    let ghost = PeerId::random();
    let live = PeerId::random();
    let _live_incoming = network.listen(live);

    let x = PeerId::random();
    let (mut x_end, _, _) = join_directly(&node.node, x).await;

    x_end
        .send(Message::state(names(&[node.id, ghost, live]), 3))
        .await
        .unwrap();

    eventually("x's report applied", || async {
        node.node.child_reports().await[0].size == 4
    })
    .await;

    drop(x_end);

    let forwarded = node.node.publish(Vec::new()).await;

    assert_eq!(forwarded.repaired, vec![live], "only the reachable orphan returns");
    assert_eq!(
        network.dials_from(node.id),
        vec![ghost, live],
        "self is never dialed"
    );
}

#[tokio::test]
async fn test_orphan_counts_as_repaired_when_parent_report_fails() {
    let network = MemoryNetwork::new();
    let node = network.spawn_node(&TreeConfig::new(2, 4));
    let (_parent_end, _parent) = adopt_by_broken_parent(&node.node).await;

    let g = PeerId::random();
    let mut g_incoming = network.listen(g);

    let x = PeerId::random();
    let (mut x_end, outcome, _welcome) = join_directly(&node.node, x).await;
    assert!(
        matches!(outcome, Err(TreeError::Codec(_))),
        "report upward fails: {outcome:?}"
    );
    assert_eq!(node.node.children().await, vec![x], "x registered regardless");

    report_state(&mut x_end, &[g], 1).await;

    eventually("x's report applied", || async {
        node.node
            .child_reports()
            .await
            .iter()
            .any(|report| report.children == names(&[g]))
    })
    .await;

    drop(x_end);

    let forwarded = node.node.publish(b"hi".to_vec()).await;

    assert_eq!(forwarded.dead, vec![x], "x detected dead");
    assert_eq!(forwarded.repaired, vec![g], "g counted as reattached");
    assert_eq!(node.node.children().await, vec![g], "g sits below the node");

    let mut stream = g_incoming.recv().await.expect("repair dial");
    let welcome = stream.recv().await.unwrap().expect("welcome");
    assert_eq!(welcome.kind, MessageType::Update, "g offered adoption");
}

#[tokio::test]
async fn test_orphaned_node_is_adopted_and_served() {
    let network = MemoryNetwork::new();
    let root = network.spawn_node(&TreeConfig::new(1, 3));
    let x = network.spawn_node(&TreeConfig::new(1, 3));
    let mut g = network.spawn_node(&TreeConfig::new(1, 3));

    assert_eq!(network.attach(&x, root.id).await.unwrap(), root.id, "x below root");
    assert_eq!(network.attach(&g, root.id).await.unwrap(), x.id, "g below x");

    eventually("root knows about g", || async {
        root.node.child_reports().await[0].children == names(&[g.id])
    })
    .await;

    x.node.close().await.unwrap();

    eventually("root notices x is gone", || async {
        root.node.publish(b"lost".to_vec()).await.dead == vec![x.id]
    })
    .await;

    eventually("g adopted by root", || async {
        g.node.parent().await == Some(root.id)
    })
    .await;

    assert_eq!(root.node.children().await, vec![g.id], "root holds g directly");

    let delivered = root.node.publish(b"again".to_vec()).await;
    assert_eq!(delivered.delivered, 1, "g reachable");

    let event = g
        .expect_event(|event| matches!(event, TreeEvent::Delivered { data } if data == b"again"))
        .await;

    assert_eq!(
        event,
        TreeEvent::Delivered {
            data: b"again".to_vec()
        },
        "g served by its new parent"
    );
}
