include!(concat!(env!("OUT_DIR"), "/generated_tests.rs"));
