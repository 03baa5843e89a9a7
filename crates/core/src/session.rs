use crate::chunking::normalize_question;
use crate::error::SessionError;
use crate::sse::{AnswerEvent, AnswerStream, StreamEnd};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Turn {
    Question(String),
    Answer { text: String, end: StreamEnd },
}

/// Question/answer history for one open document. Never persisted.
#[derive(Debug, Clone)]
pub struct ChatSession {
    doc_id: String,
    turns: Vec<Turn>,
    in_flight: Option<String>,
}

impl ChatSession {
    pub fn new(doc_id: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            turns: Vec::new(),
            in_flight: None,
        }
    }

    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Text streamed so far for the answer being built, if any.
    pub fn live_answer(&self) -> Option<&str> {
        self.in_flight.as_deref()
    }

    /// Records a question and opens an empty answer. Returns the trimmed question.
    pub fn ask(&mut self, question: &str) -> Result<String, SessionError> {
        if self.in_flight.is_some() {
            return Err(SessionError::AnswerInFlight);
        }
        let question = normalize_question(question).trim().to_string();
        if question.is_empty() {
            return Err(SessionError::EmptyQuestion);
        }

        self.turns.push(Turn::Question(question.clone()));
        self.in_flight = Some(String::new());
        Ok(question)
    }

    pub fn push_delta(&mut self, delta: &str) -> Result<(), SessionError> {
        let answer = self
            .in_flight
            .as_mut()
            .ok_or(SessionError::NoAnswerInFlight)?;
        answer.push_str(delta);
        Ok(())
    }

    /// Freezes the open answer with whatever text arrived before `end`.
    pub fn finish(&mut self, end: StreamEnd) -> Result<&Turn, SessionError> {
        let text = self.in_flight.take().ok_or(SessionError::NoAnswerInFlight)?;
        self.turns.push(Turn::Answer { text, end });
        self.turns.last().ok_or(SessionError::NoAnswerInFlight)
    }

    /// Feeds `stream` into the open answer until it ends, calling `on_delta`
    /// for every fragment.
    pub async fn stream_into<F>(
        &mut self,
        stream: &mut AnswerStream,
        mut on_delta: F,
    ) -> Result<StreamEnd, SessionError>
    where
        F: FnMut(&str),
    {
        if self.in_flight.is_none() {
            return Err(SessionError::NoAnswerInFlight);
        }

        let end = loop {
            match stream.next().await {
                Some(AnswerEvent::Delta(delta)) => {
                    on_delta(&delta);
                    self.push_delta(&delta)?;
                }
                Some(AnswerEvent::End(end)) => break end,
                None => break StreamEnd::Disconnected,
            }
        };

        self.finish(end)?;
        Ok(end)
    }
}
