use std::sync::Arc;

use netboot_httpdisk::{HttpDisk, HttpDiskError, MemFault, MemTransport};
use proptest::prelude::*;
use proptest::test_runner::TestCaseResult;

const IMAGE_BLOCKS: u64 = 64;
const BLOCK_SIZE: usize = 512;
const SENTINEL: u8 = 0xA5;

fn fault_strategy() -> impl Strategy<Value = Option<MemFault>> {
    prop_oneof![
        Just(None),
        Just(Some(MemFault::Restart)),
        (0usize..4096).prop_map(|after| Some(MemFault::CloseEarly { after })),
        (1usize..4096).prop_map(|extra| Some(MemFault::Overrun { extra })),
    ]
}

fn image() -> Vec<u8> {
    (0..IMAGE_BLOCKS as usize * BLOCK_SIZE)
        .map(|i| (i % 253) as u8)
        .collect()
}

fn check_read(
    start: u64,
    count: u64,
    chunk_size: usize,
    fault: Option<MemFault>,
) -> TestCaseResult {
    let data = image();
    let transport = MemTransport::new(data.clone()).with_chunk_size(chunk_size);
    let len = count as usize * BLOCK_SIZE;
    let offset = start as usize * BLOCK_SIZE;
    let mut buf = vec![SENTINEL; len + BLOCK_SIZE];

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let result = rt.block_on(async {
        let mut disk = HttpDisk::attach("http://mem.test/disk.img", Arc::new(transport.clone()))?;
        disk.initialize(0).await?;
        transport.set_fault(fault);
        let result = disk.read(start, count, &mut buf).await;
        disk.detach()?;
        result
    });

    let expect_ok = match fault {
        None | Some(MemFault::Restart) => true,
        Some(MemFault::CloseEarly { after }) => after >= len,
        Some(MemFault::Overrun { .. }) => false,
        Some(_) => unreachable!(),
    };

    // Nothing is ever written beyond the requested range.
    prop_assert!(buf[len..].iter().all(|&b| b == SENTINEL));
    if expect_ok {
        prop_assert!(result.is_ok(), "{result:?}");
        prop_assert_eq!(&buf[..len], &data[offset..offset + len]);
    } else {
        match result {
            Err(HttpDiskError::ShortRead { expected, actual }) => {
                prop_assert_eq!(expected, len as u64);
                prop_assert!(actual <= expected);
                let actual = actual as usize;
                prop_assert_eq!(&buf[..actual], &data[offset..offset + actual]);
            }
            other => prop_assert!(false, "expected short read, got {other:?}"),
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn read_succeeds_only_on_exact_fill(
        (start, count) in (0u64..IMAGE_BLOCKS).prop_flat_map(|start| (Just(start), 1u64..=(IMAGE_BLOCKS - start).min(8))),
        chunk_size in 1usize..2048,
        fault in fault_strategy(),
    ) {
        check_read(start, count, chunk_size, fault)?;
    }
}
