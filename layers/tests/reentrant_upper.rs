//! An upper layer that calls back into the RLC from its upcalls

use bytes::{Bytes, BytesMut};
use common::types::{Lcid, SduId};
use interfaces::RlcUpperInterface;
use layers::rlc::header::{DataPduHeader, PduFormat};
use layers::rlc::{Rlc, RlcConfig};
use parking_lot::Mutex;
use std::sync::mpsc;
use std::sync::{Arc, OnceLock, Weak};
use std::thread;
use std::time::Duration;

const LCID: Lcid = Lcid(3);

/// Slow consumer that loops every SDU back into its own bearer
#[derive(Default)]
struct EchoUpper {
    rlc: OnceLock<Weak<Rlc>>,
    received: Mutex<Vec<Bytes>>,
}

impl RlcUpperInterface for EchoUpper {
    fn deliver_sdu(&self, lcid: Lcid, sdu: Bytes) {
        thread::sleep(Duration::from_millis(200));
        if let Some(rlc) = self.rlc.get().and_then(Weak::upgrade) {
            rlc.write_sdu(lcid, sdu.clone()).unwrap();
            assert!(rlc.get_buffer_state(lcid) > 0);
        }
        self.received.lock().push(sdu);
    }

    fn notify_max_retx(&self, _lcid: Lcid) {}

    fn notify_delivery(&self, _lcid: Lcid, _sdus: &[SduId]) {}
}

fn um_pdu(sn: u32, payload: &[u8]) -> Vec<u8> {
    let header = DataPduHeader {
        sn,
        ..Default::default()
    };
    let mut pdu = BytesMut::new();
    PduFormat::Um10.pack(&header, &mut pdu);
    pdu.extend_from_slice(payload);
    pdu.to_vec()
}

#[test]
fn test_upcall_may_reenter_while_another_thread_receives() {
    let upper = Arc::new(EchoUpper::default());
    let rlc = Arc::new(Rlc::new(upper.clone()));
    upper.rlc.set(Arc::downgrade(&rlc)).unwrap();
    rlc.add_bearer(LCID, RlcConfig::um(10)).unwrap();

    let (done_tx, done_rx) = mpsc::channel();

    let first = {
        let rlc = rlc.clone();
        let done = done_tx.clone();
        thread::spawn(move || {
            rlc.write_pdu(LCID, &um_pdu(0, b"first"));
            done.send("first").unwrap();
        })
    };
    thread::sleep(Duration::from_millis(50));
    let second = {
        let rlc = rlc.clone();
        thread::spawn(move || {
            rlc.write_pdu(LCID, &um_pdu(1, b"second"));
            done_tx.send("second").unwrap();
        })
    };

    // the receiving threads must return even while the first upcall sleeps
    for _ in 0..2 {
        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("receiving thread blocked");
    }
    first.join().unwrap();
    second.join().unwrap();

    assert_eq!(
        *upper.received.lock(),
        vec![Bytes::from_static(b"first"), Bytes::from_static(b"second")]
    );
    let metrics = rlc.get_metrics(LCID).unwrap();
    assert_eq!(metrics.num_tx_sdus, 2);
    assert_eq!(metrics.num_rx_sdus, 2);
}

#[test]
fn test_batched_upcalls_reenter_in_order() {
    let upper = Arc::new(EchoUpper::default());
    let rlc = Arc::new(Rlc::new(upper.clone()));
    upper.rlc.set(Arc::downgrade(&rlc)).unwrap();
    rlc.add_bearer(LCID, RlcConfig::um(10)).unwrap();

    // SN 1 first waits for reordering, SN 0 then releases both in one batch
    rlc.write_pdu(LCID, &um_pdu(1, b"b"));
    rlc.write_pdu(LCID, &um_pdu(0, b"a"));

    assert_eq!(
        *upper.received.lock(),
        vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]
    );
    assert_eq!(rlc.get_metrics(LCID).unwrap().num_tx_sdus, 2);
}
