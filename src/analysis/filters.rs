use tantivy::tokenizer::{Token, TokenFilter, TokenStream, Tokenizer};

/// Drops tokens whose character count falls outside `[min, max]`.
/// Either bound may be left open.
#[derive(Clone, Debug)]
pub struct LengthFilter {
    min: usize,
    max: usize,
}

impl LengthFilter {
    pub fn new(min: Option<usize>, max: Option<usize>) -> Self {
        Self {
            min: min.unwrap_or(0),
            max: max.unwrap_or(usize::MAX),
        }
    }

    fn accepts(&self, text: &str) -> bool {
        let len = text.chars().count();
        len >= self.min && len <= self.max
    }
}

impl TokenFilter for LengthFilter {
    type Tokenizer<T: Tokenizer> = LengthFilterWrapper<T>;

    fn transform<T: Tokenizer>(self, tokenizer: T) -> Self::Tokenizer<T> {
        LengthFilterWrapper {
            filter: self,
            inner: tokenizer,
        }
    }
}

#[derive(Clone)]
pub struct LengthFilterWrapper<T> {
    filter: LengthFilter,
    inner: T,
}

impl<T: Tokenizer> Tokenizer for LengthFilterWrapper<T> {
    type TokenStream<'a> = LengthFilterStream<'a, T::TokenStream<'a>>;

    fn token_stream<'a>(&'a mut self, text: &'a str) -> Self::TokenStream<'a> {
        LengthFilterStream {
            filter: &self.filter,
            tail: self.inner.token_stream(text),
        }
    }
}

pub struct LengthFilterStream<'a, T> {
    filter: &'a LengthFilter,
    tail: T,
}

impl<T: TokenStream> TokenStream for LengthFilterStream<'_, T> {
    fn advance(&mut self) -> bool {
        while self.tail.advance() {
            if self.filter.accepts(&self.tail.token().text) {
                return true;
            }
        }
        false
    }

    fn token(&self) -> &Token {
        self.tail.token()
    }

    fn token_mut(&mut self) -> &mut Token {
        self.tail.token_mut()
    }
}
