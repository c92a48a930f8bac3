//! End-to-end scenario: upload a 3456-byte file (7 blocks, the last
//! short) where two ACKs are lost on their first delivery attempt,
//! forcing a timeout-driven retransmit before the transfer completes.

use switchcore::tftp::{Client, Message, BLOCK_SIZE};
use switchcore::time::SimClock;

fn file_blocks(total_len: usize) -> Vec<Vec<u8>> {
    let data: Vec<u8> = (0..total_len).map(|i| (i % 251) as u8).collect();
    data.chunks(BLOCK_SIZE).map(|c| c.to_vec()).collect()
}

#[test]
fn upload_completes_after_retransmitting_two_lost_acks() {
    let blocks = file_blocks(3456);
    assert_eq!(blocks.len(), 7);
    assert_eq!(blocks.last().unwrap().len(), 384);

    let mut clk = SimClock::new(1_000_000);
    let mut client = Client::start_upload();

    // WRQ already sent by the caller; track it for retransmit purposes.
    client.sent(&clk, Message::Wrq { filename: "boot.bin".into(), mode: "octet".into() }.encode());

    // ACKs for blocks 3 and 6 are lost on their first delivery attempt.
    let lost_on_first_try: [u16; 2] = [3, 6];
    let mut retransmits = 0u32;
    let mut sent_blocks = Vec::new();

    for ack_block in 0..=7u16 {
        if lost_on_first_try.contains(&ack_block) {
            clk.advance(1_000_000); // past the first retry deadline
            assert!(client.poll_timeout(&clk).is_some(), "expected a retransmit for ack {ack_block}");
            retransmits += 1;
        }

        let ack = Message::Ack { block: ack_block };
        let sent = client
            .on_upload_ack(&ack, |next| {
                sent_blocks.push(next);
                blocks[(next - 1) as usize].clone()
            })
            .unwrap();

        match sent {
            Some(payload) => client.sent(&clk, payload),
            None => assert_eq!(ack_block, 7, "only the final ACK should end the transfer"),
        }
    }

    assert!(client.is_done());
    assert_eq!(retransmits, 2);
    assert_eq!(sent_blocks, vec![1, 2, 3, 4, 5, 6, 7]);
}
