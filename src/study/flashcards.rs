use crate::error::StudyError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Flashcard {
    #[serde(alias = "term", alias = "question")]
    pub front: String,
    #[serde(alias = "definition", alias = "answer")]
    pub back: String,
}

/// Cards for one topic with a cursor and a flipped flag.
#[derive(Debug, Clone)]
pub struct FlashcardDeck {
    topic: String,
    cards: Vec<Flashcard>,
    index: usize,
    flipped: bool,
}

impl FlashcardDeck {
    pub fn new(topic: impl Into<String>, cards: Vec<Flashcard>) -> Result<Self, StudyError> {
        if cards.is_empty() {
            return Err(StudyError::NoFlashcards);
        }
        Ok(Self { topic: topic.into(), cards, index: 0, flipped: false })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn current(&self) -> &Flashcard {
        &self.cards[self.index]
    }

    /// Text on the visible side of the current card.
    pub fn visible_side(&self) -> &str {
        let card = self.current();
        if self.flipped {
            &card.back
        } else {
            &card.front
        }
    }

    pub fn is_flipped(&self) -> bool {
        self.flipped
    }

    /// 1-based position and deck size.
    pub fn position(&self) -> (usize, usize) {
        (self.index + 1, self.cards.len())
    }

    pub fn flip(&mut self) {
        self.flipped = !self.flipped;
    }

    /// Moves forward, wrapping to the first card. New cards show their front.
    pub fn next(&mut self) {
        self.index = (self.index + 1) % self.cards.len();
        self.flipped = false;
    }

    pub fn previous(&mut self) {
        self.index = (self.index + self.cards.len() - 1) % self.cards.len();
        self.flipped = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(front: &str, back: &str) -> Flashcard {
        Flashcard { front: front.into(), back: back.into() }
    }

    #[test]
    fn flipping_and_wrapping() {
        let mut deck = FlashcardDeck::new("bio", vec![card("ATP", "energy"), card("DNA", "genes")]).unwrap();
        assert_eq!(deck.visible_side(), "ATP");
        deck.flip();
        assert_eq!(deck.visible_side(), "energy");
        deck.next();
        assert!(!deck.is_flipped());
        assert_eq!(deck.position(), (2, 2));
        deck.next();
        assert_eq!(deck.visible_side(), "ATP");
        deck.previous();
        assert_eq!(deck.visible_side(), "DNA");
    }

    #[test]
    fn aliases_deserialize() {
        let c: Flashcard = serde_json::from_str(r#"{"term": "Osmosis", "definition": "Water diffusion"}"#).unwrap();
        assert_eq!(c, card("Osmosis", "Water diffusion"));
        assert!(matches!(FlashcardDeck::new("x", vec![]), Err(StudyError::NoFlashcards)));
    }
}
