#![no_main]
use libfuzzer_sys::fuzz_target;
use geckolink::gecko::{frame_cheat_stream, CheatList};

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(list) = CheatList::parse(text) {
            // Text form must survive a round trip
            let again = CheatList::parse(&list.to_text()).unwrap();
            assert_eq!(again, list);

            let stream = list.encode();
            assert_eq!(frame_cheat_stream(&stream).unwrap(), stream);
            let decoded = CheatList::decode(&stream).unwrap();
            assert_eq!(decoded.lines.len(), list.active().count());
        }
    }

    match frame_cheat_stream(data) {
        Ok(framed) => assert_eq!(framed.len() % 8, 0),
        Err(_) => assert_ne!(data.len() % 8, 0),
    }
});
