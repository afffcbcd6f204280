use super::*;

use crate::aid::CyclicAssociationIdGenerator;
use crate::events::PeerAddrChange;

fn addr(n: u8) -> SocketAddr {
    format!("10.0.0.{}:5000", n).parse().unwrap()
}

fn create_association(config: Config) -> (Association, mpsc::UnboundedReceiver<PeerAddrEvent>) {
    Association::new(config, Arc::new(CyclicAssociationIdGenerator::default()))
}

#[tokio::test]
async fn test_association_paths_over_handle() -> Result<()> {
    let (a, mut events_rx) = create_association(Config::default().with_name("client".to_owned()));

    a.add_peer(addr(1), TransportState::Active).await?;
    a.add_peer(addr(2), TransportState::Active).await?;

    assert_eq!(a.primary_path().await, Some(addr(1)));
    assert_eq!(a.active_path().await, Some(addr(1)));
    assert_eq!(
        a.transport_state(addr(2)).await,
        Some(TransportState::Active)
    );
    assert_eq!(a.transport_state(addr(9)).await, None, "miss is not an error");

    let ev1 = events_rx.try_recv().expect("added event");
    let ev2 = events_rx.try_recv().expect("added event");
    assert_eq!(ev1.change, PeerAddrChange::Added);
    assert_eq!(ev2.addr, addr(2));

    // Losing the active path moves new data elsewhere.
    a.control_transport(addr(1), TransportCmd::Down, SnError::FailedThreshold)
        .await?;
    assert_eq!(a.active_path().await, Some(addr(2)));
    assert_eq!(
        a.transport_state(addr(1)).await,
        Some(TransportState::Inactive)
    );

    Ok(())
}

#[tokio::test]
async fn test_association_choose_alter_transport() -> Result<()> {
    let (a, _events_rx) = create_association(Config::default().with_name("client".to_owned()));

    a.add_peer(addr(1), TransportState::Active).await?;
    let first = a.choose_alter_transport().await?;
    assert_eq!(first, addr(1), "single path, nothing sent yet");

    Ok(())
}

#[tokio::test]
async fn test_association_update_assigns_id() -> Result<()> {
    let (a, _events_rx) = create_association(Config::default().with_name("server".to_owned()));

    a.add_peer(addr(1), TransportState::Active).await?;
    a.set_state(AssociationState::CookieEchoed);
    assert_eq!(a.association_id().await, None);

    a.update(PeerUpdate {
        rwnd: 65536,
        initial_tsn: 42,
        addresses: vec![(addr(1), TransportState::Active)],
        ..Default::default()
    })
    .await?;

    assert!(a.association_id().await.is_some());
    Ok(())
}

#[tokio::test]
async fn test_association_close_marks_dead() -> Result<()> {
    let (a, _events_rx) = create_association(Config::default().with_name("client".to_owned()));
    a.add_peer(addr(1), TransportState::Active).await?;

    // A clone models another component holding a counted reference.
    let held = a.clone();

    a.close().await?;
    assert!(a.is_dead());
    assert!(held.is_dead(), "every reference observes the dead flag");
    assert_eq!(a.get_state(), AssociationState::Closed);

    assert_eq!(
        held.add_peer(addr(2), TransportState::Active).await,
        Err(crate::error::Error::ErrAssociationDead),
        "borrowers must abandon work on a dead association"
    );

    // Closing again through the clone is a no-op.
    held.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_association_rwnd_over_handle() -> Result<()> {
    let (a, _events_rx) = create_association(Config::default().with_name("client".to_owned()));
    a.add_peer(addr(1), TransportState::Active).await?;
    a.set_state(AssociationState::Established);

    let before = a.rwnd().await;
    a.rwnd_decrease(1000).await?;
    assert_eq!(a.rwnd().await, before - 1000);

    let update = a.rwnd_increase(1000).await?;
    assert_eq!(a.rwnd().await, before);
    assert!(!update, "restoring the window is below the update threshold");
    Ok(())
}
