//! Public handle generation

use rand::seq::SliceRandom;
use rand::Rng;

const ADJECTIVES: &[&str] = &[
    "quiet", "swift", "brave", "golden", "silver", "azure", "emerald", "ancient", "calm", "bright",
    "hidden", "misty", "lucky", "gentle", "wild", "frosty", "sunny", "shy",
];

const NOUNS: &[&str] = &[
    "otter", "falcon", "wolf", "raven", "tiger", "eagle", "fox", "comet", "river", "meadow",
    "ember", "harbor", "willow", "canyon", "breeze", "pebble", "lantern", "moth",
];

/// Generate a handle like `misty-otter-4821`
pub fn generate_handle() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES.choose(&mut rng).unwrap_or(&"quiet");
    let noun = NOUNS.choose(&mut rng).unwrap_or(&"otter");
    let number: u16 = rng.gen_range(1000..10000);
    format!("{adjective}-{noun}-{number}")
}
