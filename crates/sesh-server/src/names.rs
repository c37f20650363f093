//! Random default group names.

use rand::seq::IndexedRandom;

const FIRST: &[&str] = &[
    "Blue", "Afghan", "Bubba", "Maui", "Golden", "White", "Pineapple", "Fruity", "Sour", "Apple",
    "Jack", "Green", "Bruce", "Grease", "Banana", "Tropicana", "Durban", "Khalifa", "Lava",
];

const SECOND: &[&str] = &[
    "Dream", "Kush", "Wowie", "Goat", "Widow", "Express", "Pebbles", "Diesel", "Fritter", "Herer",
    "Crack", "Banner", "Monkey", "Cookies", "Poison", "Cake",
];

/// Two-word strain name such as `"Blue Dream"`.
pub fn random_strain() -> String {
    let mut rng = rand::rng();
    let first = FIRST.choose(&mut rng).copied().unwrap_or("Blue");
    let second = SECOND.choose(&mut rng).copied().unwrap_or("Dream");
    format!("{first} {second}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_known_words() {
        for _ in 0..50 {
            let name = random_strain();
            let (a, b) = name.split_once(' ').unwrap();
            assert!(FIRST.contains(&a));
            assert!(SECOND.contains(&b));
            assert!(name.len() <= crate::validation::MAX_GROUP_NAME);
        }
    }
}
