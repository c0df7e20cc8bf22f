pub use spore_shared::protocol::*;

use crate::player::{Player, Spore};

// === Message constructors ===

pub fn id_msg(id: u64) -> Msg {
    Msg::Id(IdMsg {
        id,
        protocol_version: PROTOCOL_VERSION,
    })
}

pub fn deny(reason: impl Into<String>) -> Msg {
    Msg::DenyResponse(DenyResponseMsg {
        reason: reason.into(),
    })
}

pub fn disconnect(reason: impl Into<String>) -> Msg {
    Msg::Disconnect(DisconnectMsg {
        reason: reason.into(),
    })
}

pub fn player_msg(id: u64, player: &Player) -> Msg {
    Msg::Player(PlayerMsg {
        id,
        name: player.name.clone(),
        x: player.x,
        y: player.y,
        radius: player.radius,
        direction: player.direction,
        speed: player.speed,
        color: player.color,
    })
}

pub fn spore_wire(id: u64, spore: &Spore) -> SporeMsg {
    SporeMsg {
        id,
        x: spore.x,
        y: spore.y,
        radius: spore.radius,
    }
}

pub fn spore_msg(id: u64, spore: &Spore) -> Msg {
    Msg::Spore(spore_wire(id, spore))
}

pub fn spores_batch(spores: &[(u64, Spore)]) -> Msg {
    Msg::SporesBatch(SporesBatchMsg {
        spores: spores
            .iter()
            .map(|(id, spore)| spore_wire(*id, spore))
            .collect(),
    })
}

pub fn hiscore_board(hiscores: Vec<HiscoreMsg>) -> Msg {
    Msg::HiscoreBoard(HiscoreBoardMsg { hiscores })
}

/// One outbound frame: the JSON envelope followed by a single newline.
pub fn encode_frame(packet: &Packet) -> serde_json::Result<String> {
    let mut text = serde_json::to_string(packet)?;
    text.push('\n');
    Ok(text)
}

/// Parse one inbound frame. Surrounding whitespace is ignored.
pub fn decode_frame(data: &[u8]) -> serde_json::Result<Packet> {
    serde_json::from_slice(data.trim_ascii())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_end_with_one_newline() {
        let packet = Packet {
            sender_id: 4,
            msg: id_msg(4),
        };
        let frame = encode_frame(&packet).unwrap();
        assert!(frame.ends_with("}\n"));
        assert_eq!(frame.matches('\n').count(), 1);

        let parsed = decode_frame(frame.as_bytes()).unwrap();
        assert_eq!(parsed.sender_id, 4);
        assert!(matches!(
            parsed.msg,
            Msg::Id(IdMsg {
                id: 4,
                protocol_version: PROTOCOL_VERSION
            })
        ));
    }

    #[test]
    fn garbage_frame_is_an_error() {
        assert!(decode_frame(b"not valid json").is_err());
        assert!(decode_frame(br#"{"msg":{"type":"nope"}}"#).is_err());
    }

    #[test]
    fn player_msg_carries_body_and_color() {
        let player = Player {
            name: "alice".to_string(),
            x: 1.0,
            y: 2.0,
            radius: 20.0,
            direction: 0.5,
            speed: 150.0,
            color: 0x00ff00,
            ..Default::default()
        };
        match player_msg(9, &player) {
            Msg::Player(p) => {
                assert_eq!(p.id, 9);
                assert_eq!(p.name, "alice");
                assert_eq!((p.x, p.y, p.radius), (1.0, 2.0, 20.0));
                assert_eq!(p.color, 0x00ff00);
            }
            other => panic!("Expected Player, got {:?}", other),
        }
    }

    #[test]
    fn spores_batch_keeps_ids() {
        let spores = [
            (
                3,
                Spore {
                    x: 0.0,
                    y: 1.0,
                    radius: 8.0,
                },
            ),
            (
                5,
                Spore {
                    x: 2.0,
                    y: 3.0,
                    radius: 12.0,
                },
            ),
        ];
        match spores_batch(&spores) {
            Msg::SporesBatch(batch) => {
                let ids: Vec<u64> = batch.spores.iter().map(|s| s.id).collect();
                assert_eq!(ids, vec![3, 5]);
            }
            other => panic!("Expected SporesBatch, got {:?}", other),
        }
    }
}
