//! Integration tests for the ymsg-core public API.
//!
//! These exercise the codec, fragment reassembly, and authentication
//! together the way the session engine uses them: bytes off a stream are
//! walked with `decode_packet`, LIST fragments go through a
//! `FragmentBuffer`, and an AUTH challenge is answered.

use ymsg_core::{
    compute_response, decode_packet, encode_packet, status, AuthVersion, FragmentBuffer, Packet,
    PacketBody, ServiceType,
};

fn roundtrip(packet: &Packet) -> Packet {
    let bytes = encode_packet(packet).expect("encode must succeed");
    let (decoded, consumed) = decode_packet(&bytes).expect("decode must succeed");
    assert_eq!(consumed, bytes.len(), "all bytes must be consumed");
    decoded
}

#[test]
fn test_roundtrip_preserves_header_and_repeated_fields() {
    let body = PacketBody::new()
        .with("0", "alice")
        .with("7", "bob")
        .with("10", "0")
        .with("7", "carol")
        .with("10", "2")
        .with("14", "naïve café ✓");
    let original = Packet::new(ServiceType::Logon, body)
        .with_status(status::OFFLINE)
        .with_session_id(0xDEAD_BEEF);

    let decoded = roundtrip(&original);

    assert_eq!(decoded, original);
}

#[test]
fn test_walks_a_stream_of_back_to_back_packets() {
    // Arrange
    let packets = vec![
        Packet::new(ServiceType::Ping, PacketBody::new()),
        Packet::new(ServiceType::Message, PacketBody::new().with("14", "hi")),
        Packet::new(ServiceType::Unknown(0x0300), PacketBody::new().with("1", "x")),
    ];
    let mut stream = Vec::new();
    for p in &packets {
        stream.extend(encode_packet(p).unwrap());
    }

    // Act
    let mut cursor = 0;
    let mut decoded = Vec::new();
    while cursor < stream.len() {
        let (packet, consumed) = decode_packet(&stream[cursor..]).unwrap();
        decoded.push(packet);
        cursor += consumed;
    }

    // Assert
    assert_eq!(decoded, packets);
}

#[test]
fn test_list_fragments_decoded_from_wire_merge_to_unsplit_list() {
    // Arrange
    let unsplit = Packet::new(
        ServiceType::List,
        PacketBody::new()
            .with("87", "Friends:bob,carol\n")
            .with("88", "spam")
            .with("59", "C\tcookie"),
    );
    let part_a = Packet::new(
        ServiceType::List,
        PacketBody::new().with("87", "Friends:bo").with("88", "sp"),
    )
    .with_status(status::FRAGMENT_IN_PROGRESS);
    let part_b = Packet::new(
        ServiceType::List,
        PacketBody::new()
            .with("87", "b,carol\n")
            .with("88", "am")
            .with("59", "C\tcookie"),
    );
    let mut buffer = FragmentBuffer::for_list();

    // Act
    assert!(buffer.offer(roundtrip(&part_a)).is_none());
    let merged = buffer.offer(roundtrip(&part_b)).expect("list completes");

    // Assert – body equal; primary header kept
    assert_eq!(merged.body, unsplit.body);
    assert_eq!(merged.status, status::FRAGMENT_IN_PROGRESS);
}

#[cfg(feature = "auth")]
#[test]
fn test_challenge_packet_drives_version_selection() {
    // Arrange
    let v1_challenge = Packet::new(ServiceType::Auth, PacketBody::new().with("94", "abc123"));
    let v2_challenge = Packet::new(
        ServiceType::Auth,
        PacketBody::new().with("94", "abc123").with("13", "1"),
    );

    // Act
    let v1_version = AuthVersion::from_flag(v1_challenge.value("13"));
    let v2_version = AuthVersion::from_flag(v2_challenge.value("13"));
    let v1 = compute_response(v1_version, "testuser", "secret", "abc123").unwrap();
    let v2 = compute_response(v2_version, "testuser", "secret", "abc123").unwrap();

    // Assert
    assert_eq!(v1_version, AuthVersion::V1);
    assert_eq!(v2_version, AuthVersion::V2);
    assert_ne!(v1, v2);
}
